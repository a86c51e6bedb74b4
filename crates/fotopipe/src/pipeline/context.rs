use std::path::PathBuf;

/// Immutable per-job context, constructed once when a job is claimed and
/// passed by reference into every component call.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Opaque job identifier, assigned externally.
    pub job_id: String,
    /// Where the project inputs live.
    pub location: PathBuf,
}

impl JobContext {
    pub fn new(job_id: impl Into<String>, location: impl Into<PathBuf>) -> Self {
        Self {
            job_id: job_id.into(),
            location: location.into(),
        }
    }
}
