//! Job source abstraction.
//!
//! The source owns "next job" selection and exclusivity; the driver only
//! polls, claims and reports back. The database implementation claims with
//! a single atomic UPDATE, so concurrent driver processes sharing one
//! database never receive the same job.

use chrono::Utc;

use crate::db::{job_repo, Database, DatabaseError};
use crate::pipeline::{Status, StoreError};

use super::job::ClaimedJob;

pub trait JobSource {
    /// Number of jobs currently waiting.
    fn pending_count(&self) -> Result<u64, StoreError>;

    /// Claims the next pending job, moving it to `processing`.
    fn claim_next(&self) -> Result<Option<ClaimedJob>, StoreError>;

    /// Records the final status of a processed job.
    fn finish(&self, job_id: &str, status: Status, error: Option<&str>)
        -> Result<(), StoreError>;
}

pub struct DbJobSource {
    db: Database,
}

impl DbJobSource {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn unavailable(e: DatabaseError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

impl JobSource for DbJobSource {
    fn pending_count(&self) -> Result<u64, StoreError> {
        job_repo::count_by_status(&self.db, Status::Pending.as_str()).map_err(unavailable)
    }

    fn claim_next(&self) -> Result<Option<ClaimedJob>, StoreError> {
        let now = Utc::now().to_rfc3339();
        job_repo::claim_next(&self.db, &now).map_err(unavailable)
    }

    fn finish(
        &self,
        job_id: &str,
        status: Status,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        job_repo::finish(&self.db, job_id, status.as_str(), error, &now).map_err(unavailable)
    }
}
