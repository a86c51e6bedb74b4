pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod georef;
pub mod pipeline;
pub mod queue;
pub mod settings;

pub use config::{load_config, Config, EngineKind, RunMode};
pub use engine::{Engine, EngineError, FilterCriterion};
pub use error::{ConfigError, FotopipeError, QueueError, Result};
pub use pipeline::{
    ExecutionOutcome, JobContext, JobOutcome, Pipeline, Status, StepMetric, StepName,
};
pub use settings::{Settings, SettingsError};
