//! Database-backed implementation of the pipeline's `StatusStore` seam.

use std::str::FromStr;

use chrono::Utc;

use crate::pipeline::{Status, StatusStore, StepName, StoreError};

use super::{step_repo, Database, DatabaseError};

pub struct DbStatusStore {
    db: Database,
}

impl DbStatusStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn unavailable(e: DatabaseError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

impl StatusStore for DbStatusStore {
    fn step_status(&self, job_id: &str, step: StepName) -> Result<Status, StoreError> {
        let row = step_repo::get(&self.db, job_id, step.as_str()).map_err(unavailable)?;
        match row {
            None => Ok(Status::Pending),
            Some(row) => Status::from_str(&row.status).map_err(|reason| StoreError::Corrupt {
                job_id: job_id.to_string(),
                step: step.as_str().to_string(),
                reason,
            }),
        }
    }

    fn set_step_status(
        &self,
        job_id: &str,
        step: StepName,
        status: Status,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        step_repo::upsert(&self.db, job_id, step.as_str(), status.as_str(), error, &now)
            .map_err(unavailable)
    }
}
