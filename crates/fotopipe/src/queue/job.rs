use std::path::PathBuf;

use crate::pipeline::{ExecutionOutcome, StepName};

/// A job handed out by the job source: claimed, not yet processed.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: String,
    pub location: PathBuf,
    /// Settings group linked to this job; `None` in a database that never
    /// assigned one (fails resolution before any step runs).
    pub settings_group: Option<i64>,
}

/// Per-step results of one pipeline run, aggregated for reporting.
#[derive(Debug)]
pub struct JobOutcome {
    pub job_id: String,
    pub steps: Vec<(StepName, ExecutionOutcome)>,
    /// Last recomputed georeferencing error, metres.
    pub georef_error: Option<f64>,
}

impl JobOutcome {
    pub fn new(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            steps: Vec::new(),
            georef_error: None,
        }
    }

    pub fn push(&mut self, step: StepName, outcome: ExecutionOutcome) {
        self.steps.push((step, outcome));
    }

    pub fn outcome_for(&self, step: StepName) -> Option<&ExecutionOutcome> {
        self.steps
            .iter()
            .find(|(name, _)| *name == step)
            .map(|(_, outcome)| outcome)
    }

    pub fn any_failed(&self) -> bool {
        self.steps.iter().any(|(_, o)| o.is_failure())
    }

    pub fn failed_steps(&self) -> Vec<StepName> {
        self.steps
            .iter()
            .filter(|(_, o)| o.is_failure())
            .map(|(name, _)| *name)
            .collect()
    }

    /// Short failure summary for the job record, e.g.
    /// `"2 steps failed: mesh, texture"`.
    pub fn failure_summary(&self) -> Option<String> {
        let failed = self.failed_steps();
        if failed.is_empty() {
            return None;
        }
        let names: Vec<&str> = failed.iter().map(|s| s.as_str()).collect();
        Some(format!(
            "{} step{} failed: {}",
            failed.len(),
            if failed.len() == 1 { "" } else { "s" },
            names.join(", ")
        ))
    }
}
