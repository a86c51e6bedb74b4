//! Metrics recording seam.
//!
//! Step metrics go to the processing record, not to the status store; the
//! two concerns are persisted independently.

use std::collections::HashMap;
use std::sync::Mutex;

use super::context::JobContext;
use super::status::StoreError;
use super::step::{StepMetric, StepName};

pub trait MetricsSink {
    fn record_step_metric(
        &self,
        ctx: &JobContext,
        step: StepName,
        metric: &StepMetric,
    ) -> Result<(), StoreError>;

    /// The running georeferencing error estimate — the one cross-cutting
    /// metric written more than once per job.
    fn record_georef_error(&self, ctx: &JobContext, error_m: f64) -> Result<(), StoreError>;
}

/// Discards everything. Used where no processing record exists.
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_step_metric(
        &self,
        _ctx: &JobContext,
        _step: StepName,
        _metric: &StepMetric,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    fn record_georef_error(&self, _ctx: &JobContext, _error_m: f64) -> Result<(), StoreError> {
        Ok(())
    }
}

/// In-memory sink for standalone mode and tests.
#[derive(Default)]
pub struct MemoryMetrics {
    step_metrics: Mutex<HashMap<(String, StepName), StepMetric>>,
    georef_errors: Mutex<Vec<(String, f64)>>,
}

impl MemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step_metric(&self, job_id: &str, step: StepName) -> Option<StepMetric> {
        self.step_metrics
            .lock()
            .expect("metrics lock")
            .get(&(job_id.to_string(), step))
            .copied()
    }

    /// All georeferencing error values recorded for a job, in order.
    pub fn georef_history(&self, job_id: &str) -> Vec<f64> {
        self.georef_errors
            .lock()
            .expect("metrics lock")
            .iter()
            .filter(|(id, _)| id == job_id)
            .map(|(_, v)| *v)
            .collect()
    }
}

impl MetricsSink for MemoryMetrics {
    fn record_step_metric(
        &self,
        ctx: &JobContext,
        step: StepName,
        metric: &StepMetric,
    ) -> Result<(), StoreError> {
        self.step_metrics
            .lock()
            .expect("metrics lock")
            .insert((ctx.job_id.clone(), step), *metric);
        Ok(())
    }

    fn record_georef_error(&self, ctx: &JobContext, error_m: f64) -> Result<(), StoreError> {
        self.georef_errors
            .lock()
            .expect("metrics lock")
            .push((ctx.job_id.clone(), error_m));
        Ok(())
    }
}
