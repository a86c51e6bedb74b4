//! Queue driver — polls the job source and processes jobs one at a time.
//!
//! Strictly sequential: one job is fully processed end-to-end before the
//! next is claimed. Per-step failures are absorbed inside the pipeline;
//! only failures outside the guarded steps reach this loop, where they
//! mark the job failed and the loop proceeds to the next poll.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, info_span};

use crate::error::FotopipeError;
use crate::pipeline::{Status, StoreError};

use super::job::{ClaimedJob, JobOutcome};
use super::source::JobSource;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DriveSummary {
    pub processed: u64,
    pub failed: u64,
}

pub struct QueueDriver<'a> {
    source: &'a dyn JobSource,
    interrupt: Option<Arc<AtomicBool>>,
}

impl<'a> QueueDriver<'a> {
    pub fn new(source: &'a dyn JobSource) -> Self {
        Self {
            source,
            interrupt: None,
        }
    }

    /// The flag is checked between jobs; the in-flight job always runs to
    /// completion (engine calls have no cancellation).
    pub fn with_interrupt(source: &'a dyn JobSource, interrupt: Arc<AtomicBool>) -> Self {
        Self {
            source,
            interrupt: Some(interrupt),
        }
    }

    /// Drains the queue, invoking `process` for each claimed job, and
    /// terminates cleanly once the pending count reaches zero.
    pub fn run<F>(&self, mut process: F) -> Result<DriveSummary, StoreError>
    where
        F: FnMut(&ClaimedJob) -> Result<JobOutcome, FotopipeError>,
    {
        let mut summary = DriveSummary::default();

        loop {
            if self.interrupted() {
                info!("interrupt received, stopping before next claim");
                break;
            }

            let pending = self.source.pending_count()?;
            if pending == 0 {
                info!("job queue is empty");
                break;
            }
            debug!(pending, "jobs in queue");

            let Some(job) = self.source.claim_next()? else {
                // Someone else drained the queue between poll and claim.
                break;
            };
            let _span = info_span!("queued_job", job_id = %job.id).entered();

            match process(&job) {
                Ok(outcome) => {
                    if let Some(failure) = outcome.failure_summary() {
                        self.source
                            .finish(&job.id, Status::Failed, Some(&failure))?;
                        summary.failed += 1;
                    } else {
                        self.source.finish(&job.id, Status::Done, None)?;
                    }
                }
                Err(e) => {
                    error!(job_id = %job.id, error = %e, "job failed outside the step sequence");
                    self.source
                        .finish(&job.id, Status::Failed, Some(&e.to_string()))?;
                    summary.failed += 1;
                }
            }
            summary.processed += 1;
        }

        Ok(summary)
    }

    fn interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::pipeline::{ExecutionOutcome, StepName};

    /// Scripted job source: fixed pending counts and a job list.
    struct FakeSource {
        counts: Mutex<VecDeque<u64>>,
        jobs: Mutex<VecDeque<ClaimedJob>>,
        finished: Mutex<Vec<(String, Status, Option<String>)>>,
        claims: Mutex<u64>,
    }

    impl FakeSource {
        fn new(counts: &[u64], job_ids: &[&str]) -> Self {
            Self {
                counts: Mutex::new(counts.iter().copied().collect()),
                jobs: Mutex::new(
                    job_ids
                        .iter()
                        .map(|id| ClaimedJob {
                            id: id.to_string(),
                            location: format!("/data/{}", id).into(),
                            settings_group: None,
                        })
                        .collect(),
                ),
                finished: Mutex::new(Vec::new()),
                claims: Mutex::new(0),
            }
        }

        fn claim_count(&self) -> u64 {
            *self.claims.lock().unwrap()
        }

        fn finished(&self) -> Vec<(String, Status, Option<String>)> {
            self.finished.lock().unwrap().clone()
        }
    }

    impl JobSource for FakeSource {
        fn pending_count(&self) -> Result<u64, StoreError> {
            Ok(self.counts.lock().unwrap().pop_front().unwrap_or(0))
        }

        fn claim_next(&self) -> Result<Option<ClaimedJob>, StoreError> {
            *self.claims.lock().unwrap() += 1;
            Ok(self.jobs.lock().unwrap().pop_front())
        }

        fn finish(
            &self,
            job_id: &str,
            status: Status,
            error: Option<&str>,
        ) -> Result<(), StoreError> {
            self.finished.lock().unwrap().push((
                job_id.to_string(),
                status,
                error.map(|s| s.to_string()),
            ));
            Ok(())
        }
    }

    fn success(job: &ClaimedJob) -> JobOutcome {
        let mut outcome = JobOutcome::new(&job.id);
        outcome.push(StepName::Alignment, ExecutionOutcome::Succeeded(None));
        outcome
    }

    #[test]
    fn test_terminates_after_reported_counts() {
        let source = FakeSource::new(&[2, 1, 0], &["a", "b"]);
        let driver = QueueDriver::new(&source);
        let mut processed = Vec::new();

        let summary = driver
            .run(|job| {
                processed.push(job.id.clone());
                Ok(success(job))
            })
            .unwrap();

        // Exactly two jobs processed, no third claim attempted.
        assert_eq!(processed, vec!["a", "b"]);
        assert_eq!(source.claim_count(), 2);
        assert_eq!(
            summary,
            DriveSummary {
                processed: 2,
                failed: 0
            }
        );
    }

    #[test]
    fn test_clean_exit_on_empty_queue() {
        let source = FakeSource::new(&[0], &[]);
        let driver = QueueDriver::new(&source);
        let summary = driver.run(|job| Ok(success(job))).unwrap();
        assert_eq!(summary, DriveSummary::default());
        assert_eq!(source.claim_count(), 0);
    }

    #[test]
    fn test_job_with_failed_step_is_marked_failed_overall() {
        let source = FakeSource::new(&[1, 0], &["a"]);
        let driver = QueueDriver::new(&source);

        driver
            .run(|job| {
                let mut outcome = JobOutcome::new(&job.id);
                outcome.push(
                    StepName::Mesh,
                    ExecutionOutcome::Failed("out of memory".to_string()),
                );
                outcome.push(StepName::Export, ExecutionOutcome::Succeeded(None));
                Ok(outcome)
            })
            .unwrap();

        let finished = source.finished();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].1, Status::Failed);
        assert!(finished[0].2.as_deref().unwrap().contains("mesh"));
    }

    #[test]
    fn test_defect_fails_the_job_and_continues() {
        let source = FakeSource::new(&[2, 1, 0], &["bad", "good"]);
        let driver = QueueDriver::new(&source);

        let summary = driver
            .run(|job| {
                if job.id == "bad" {
                    Err(crate::settings::SettingsError::NoGroupLinked(job.id.clone()).into())
                } else {
                    Ok(success(job))
                }
            })
            .unwrap();

        assert_eq!(
            summary,
            DriveSummary {
                processed: 2,
                failed: 1
            }
        );
        let finished = source.finished();
        assert_eq!(finished[0].0, "bad");
        assert_eq!(finished[0].1, Status::Failed);
        assert!(finished[0].2.is_some());
        assert_eq!(finished[1].0, "good");
        assert_eq!(finished[1].1, Status::Done);
    }

    #[test]
    fn test_interrupt_stops_before_next_claim() {
        let source = FakeSource::new(&[2, 1, 0], &["a", "b"]);
        let flag = Arc::new(AtomicBool::new(false));
        let driver = QueueDriver::with_interrupt(&source, flag.clone());

        let summary = driver
            .run(|job| {
                // Request shutdown while the first job is in flight.
                flag.store(true, Ordering::Relaxed);
                Ok(success(job))
            })
            .unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(source.claim_count(), 1);
    }

    #[test]
    fn test_store_error_propagates() {
        struct BrokenSource;
        impl JobSource for BrokenSource {
            fn pending_count(&self) -> Result<u64, StoreError> {
                Err(StoreError::Unavailable("connection refused".to_string()))
            }
            fn claim_next(&self) -> Result<Option<ClaimedJob>, StoreError> {
                unreachable!()
            }
            fn finish(
                &self,
                _job_id: &str,
                _status: Status,
                _error: Option<&str>,
            ) -> Result<(), StoreError> {
                unreachable!()
            }
        }

        let driver = QueueDriver::new(&BrokenSource);
        let err = driver.run(|job| Ok(success(job)));
        assert!(matches!(err, Err(StoreError::Unavailable(_))));
    }
}
