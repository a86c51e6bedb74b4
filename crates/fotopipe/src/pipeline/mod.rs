pub mod context;
pub mod error;
pub mod executor;
pub mod filtering;
pub mod metrics;
pub mod runner;
pub mod status;
pub mod step;

pub use context::JobContext;
pub use error::PipelineError;
pub use executor::StepExecutor;
pub use metrics::{MemoryMetrics, MetricsSink, NoopMetrics};
pub use runner::Pipeline;
pub use status::{MemoryStatusStore, StatusStore, StoreError};
pub use step::{ExecutionOutcome, Status, StepMetric, StepName};

pub use crate::queue::job::JobOutcome;
