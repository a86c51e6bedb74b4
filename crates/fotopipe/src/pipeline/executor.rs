//! Step executor — the guarded block around every engine capability call.

use tracing::{debug, warn};

use crate::engine::EngineError;

use super::context::JobContext;
use super::metrics::MetricsSink;
use super::status::{StatusStore, StoreError};
use super::step::{ExecutionOutcome, Status, StepMetric, StepName};

pub struct StepExecutor<'a> {
    status: &'a dyn StatusStore,
    metrics: &'a dyn MetricsSink,
}

impl<'a> StepExecutor<'a> {
    pub fn new(status: &'a dyn StatusStore, metrics: &'a dyn MetricsSink) -> Self {
        Self { status, metrics }
    }

    /// Runs one step of one job with skip-if-done semantics.
    ///
    /// The status record is written exactly twice per execution attempt:
    /// `processing` before the action, `done` or `failed` after. An action
    /// failure is captured into the outcome — it must never abort the
    /// remaining steps of the job. Store errors do propagate.
    pub fn execute<F>(
        &self,
        ctx: &JobContext,
        step: StepName,
        enabled: bool,
        action: F,
    ) -> Result<ExecutionOutcome, StoreError>
    where
        F: FnOnce() -> Result<Option<StepMetric>, EngineError>,
    {
        if !enabled {
            debug!(job_id = %ctx.job_id, step = %step, "step disabled, skipping");
            return Ok(ExecutionOutcome::Skipped);
        }

        let current = self.status.step_status(&ctx.job_id, step)?;
        if current.is_settled() {
            debug!(job_id = %ctx.job_id, step = %step, status = %current, "step already settled");
            return Ok(ExecutionOutcome::AlreadyDone);
        }

        self.status
            .set_step_status(&ctx.job_id, step, Status::Processing, None)?;

        match action() {
            Ok(metric) => {
                if let Some(ref m) = metric {
                    self.metrics.record_step_metric(ctx, step, m)?;
                }
                self.status
                    .set_step_status(&ctx.job_id, step, Status::Done, None)?;
                debug!(job_id = %ctx.job_id, step = %step, "step done");
                Ok(ExecutionOutcome::Succeeded(metric))
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(job_id = %ctx.job_id, step = %step, error = %reason, "step failed");
                self.status
                    .set_step_status(&ctx.job_id, step, Status::Failed, Some(&reason))?;
                Ok(ExecutionOutcome::Failed(reason))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::pipeline::metrics::MemoryMetrics;
    use crate::pipeline::status::MemoryStatusStore;

    fn ctx() -> JobContext {
        JobContext::new("job-1", "/data/project")
    }

    #[test]
    fn test_disabled_step_never_transitions_status() {
        let store = MemoryStatusStore::new();
        let metrics = MemoryMetrics::new();
        let executor = StepExecutor::new(&store, &metrics);
        let calls = Cell::new(0u32);

        let outcome = executor
            .execute(&ctx(), StepName::Alignment, false, || {
                calls.set(calls.get() + 1);
                Ok(Some(StepMetric::Count(1)))
            })
            .unwrap();

        assert_eq!(outcome, ExecutionOutcome::Skipped);
        assert_eq!(calls.get(), 0);
        assert_eq!(
            store.step_status("job-1", StepName::Alignment).unwrap(),
            Status::Pending
        );
    }

    #[test]
    fn test_successful_step_records_metric_and_done() {
        let store = MemoryStatusStore::new();
        let metrics = MemoryMetrics::new();
        let executor = StepExecutor::new(&store, &metrics);

        let outcome = executor
            .execute(&ctx(), StepName::Alignment, true, || {
                Ok(Some(StepMetric::Count(42)))
            })
            .unwrap();

        assert_eq!(outcome, ExecutionOutcome::Succeeded(Some(StepMetric::Count(42))));
        assert_eq!(
            store.step_status("job-1", StepName::Alignment).unwrap(),
            Status::Done
        );
        assert_eq!(
            metrics.step_metric("job-1", StepName::Alignment),
            Some(StepMetric::Count(42))
        );
    }

    #[test]
    fn test_done_step_is_not_re_executed() {
        let store = MemoryStatusStore::new();
        let metrics = MemoryMetrics::new();
        let executor = StepExecutor::new(&store, &metrics);
        let calls = Cell::new(0u32);

        let run = || {
            executor.execute(&ctx(), StepName::Mesh, true, || {
                calls.set(calls.get() + 1);
                Ok(None)
            })
        };

        assert_eq!(run().unwrap(), ExecutionOutcome::Succeeded(None));
        assert_eq!(run().unwrap(), ExecutionOutcome::AlreadyDone);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_skip_override_bypasses_action() {
        let store = MemoryStatusStore::new();
        store.seed("job-1", StepName::Export, Status::Skip);
        let metrics = MemoryMetrics::new();
        let executor = StepExecutor::new(&store, &metrics);
        let calls = Cell::new(0u32);

        let outcome = executor
            .execute(&ctx(), StepName::Export, true, || {
                calls.set(calls.get() + 1);
                Ok(None)
            })
            .unwrap();

        assert_eq!(outcome, ExecutionOutcome::AlreadyDone);
        assert_eq!(calls.get(), 0);
        // Skip is preserved, not rewritten.
        assert_eq!(
            store.step_status("job-1", StepName::Export).unwrap(),
            Status::Skip
        );
    }

    #[test]
    fn test_failed_action_is_captured_not_raised() {
        let store = MemoryStatusStore::new();
        let metrics = MemoryMetrics::new();
        let executor = StepExecutor::new(&store, &metrics);

        let outcome = executor
            .execute(&ctx(), StepName::DenseCloud, true, || {
                Err(EngineError::Capability {
                    op: "build_dense_cloud".to_string(),
                    message: "out of GPU memory".to_string(),
                })
            })
            .unwrap();

        match outcome {
            ExecutionOutcome::Failed(reason) => {
                assert!(reason.contains("out of GPU memory"));
            }
            other => panic!("expected Failed, got {:?}", other),
        }
        assert_eq!(
            store.step_status("job-1", StepName::DenseCloud).unwrap(),
            Status::Failed
        );
    }

    #[test]
    fn test_failure_in_a_sequence_leaves_later_steps_running() {
        let store = MemoryStatusStore::new();
        let metrics = MemoryMetrics::new();
        let executor = StepExecutor::new(&store, &metrics);

        // Three-step sequence where the middle step fails.
        let sequence = [
            (StepName::Alignment, true),
            (StepName::Georeference, false),
            (StepName::PruneMarkers, true),
        ];

        let mut outcomes = Vec::new();
        for (step, healthy) in sequence {
            let outcome = executor
                .execute(&ctx(), step, true, || {
                    if healthy {
                        Ok(Some(StepMetric::Count(1)))
                    } else {
                        Err(EngineError::Capability {
                            op: step.as_str().to_string(),
                            message: "broken".to_string(),
                        })
                    }
                })
                .unwrap();
            outcomes.push(outcome);
        }

        assert!(matches!(outcomes[0], ExecutionOutcome::Succeeded(_)));
        assert!(matches!(outcomes[1], ExecutionOutcome::Failed(_)));
        assert!(matches!(outcomes[2], ExecutionOutcome::Succeeded(_)));
        assert_eq!(
            store.step_status("job-1", StepName::PruneMarkers).unwrap(),
            Status::Done
        );
    }

    #[test]
    fn test_failed_step_can_be_retried_on_next_run() {
        let store = MemoryStatusStore::new();
        let metrics = MemoryMetrics::new();
        let executor = StepExecutor::new(&store, &metrics);
        let calls = Cell::new(0u32);

        let outcome = executor
            .execute(&ctx(), StepName::Texture, true, || {
                calls.set(calls.get() + 1);
                Err(EngineError::Capability {
                    op: "build_texture".to_string(),
                    message: "transient".to_string(),
                })
            })
            .unwrap();
        assert!(outcome.is_failure());

        // `failed` is not a settled state — a re-run attempts the step again.
        let outcome = executor
            .execute(&ctx(), StepName::Texture, true, || {
                calls.set(calls.get() + 1);
                Ok(None)
            })
            .unwrap();
        assert_eq!(outcome, ExecutionOutcome::Succeeded(None));
        assert_eq!(calls.get(), 2);
    }
}
