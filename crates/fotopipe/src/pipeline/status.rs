//! Status store abstraction.
//!
//! Each status write is an independent, durably-committed operation issued
//! immediately after the corresponding step transition, so a crash between
//! steps leaves the store accurately reflecting the last completed step.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

use super::step::{Status, StepName};

/// The backing persistence could not be reached or refused the operation.
/// Never retried silently — propagates to the caller and fails the current
/// job only.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("status store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt status record for ({job_id}, {step}): {reason}")]
    Corrupt {
        job_id: String,
        step: String,
        reason: String,
    },
}

/// Persistent mapping from (job, step) to the step's current state.
///
/// A missing record reads as `Pending`.
pub trait StatusStore {
    fn step_status(&self, job_id: &str, step: StepName) -> Result<Status, StoreError>;

    fn set_step_status(
        &self,
        job_id: &str,
        step: StepName,
        status: Status,
        error: Option<&str>,
    ) -> Result<(), StoreError>;
}

/// In-memory store backing standalone mode and unit tests.
#[derive(Default)]
pub struct MemoryStatusStore {
    records: Mutex<HashMap<(String, StepName), Status>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed a record, e.g. an operator `skip` override.
    pub fn seed(&self, job_id: &str, step: StepName, status: Status) {
        self.records
            .lock()
            .expect("status map lock")
            .insert((job_id.to_string(), step), status);
    }
}

impl StatusStore for MemoryStatusStore {
    fn step_status(&self, job_id: &str, step: StepName) -> Result<Status, StoreError> {
        let records = self.records.lock().expect("status map lock");
        Ok(records
            .get(&(job_id.to_string(), step))
            .copied()
            .unwrap_or(Status::Pending))
    }

    fn set_step_status(
        &self,
        job_id: &str,
        step: StepName,
        status: Status,
        _error: Option<&str>,
    ) -> Result<(), StoreError> {
        self.records
            .lock()
            .expect("status map lock")
            .insert((job_id.to_string(), step), status);
        Ok(())
    }
}
