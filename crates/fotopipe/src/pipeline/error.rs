use thiserror::Error;

use super::status::StoreError;

/// Failures outside the per-step guarded blocks. These escape to the queue
/// driver, which marks the whole job failed and moves on; per-step engine
/// failures never surface here.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to load project: {0}")]
    ProjectLoad(#[source] crate::engine::EngineError),

    #[error("Status store failure: {0}")]
    Store(#[from] StoreError),
}
