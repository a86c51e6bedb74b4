//! Step identity, status values and execution outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One named stage of the processing sequence.
///
/// The variant order here is the execution order; `StepName::SEQUENCE`
/// exposes it for iteration. Steps are not reorderable — each depends on
/// artifacts produced by the previous enabled step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    QualityFilter,
    Alignment,
    Georeference,
    PruneMarkers,
    Scalebars,
    AlignRegion,
    OptimizeCameras,
    FilterUncertainty,
    FilterProjectionAccuracy,
    FilterReprojection,
    DepthMaps,
    DenseCloud,
    Mesh,
    Texture,
    Dem,
    Orthomosaic,
    Export,
}

impl StepName {
    /// The full processing sequence, in execution order.
    pub const SEQUENCE: [StepName; 17] = [
        StepName::QualityFilter,
        StepName::Alignment,
        StepName::Georeference,
        StepName::PruneMarkers,
        StepName::Scalebars,
        StepName::AlignRegion,
        StepName::OptimizeCameras,
        StepName::FilterUncertainty,
        StepName::FilterProjectionAccuracy,
        StepName::FilterReprojection,
        StepName::DepthMaps,
        StepName::DenseCloud,
        StepName::Mesh,
        StepName::Texture,
        StepName::Dem,
        StepName::Orthomosaic,
        StepName::Export,
    ];

    /// Stable identifier used as the `step` key in the status store.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::QualityFilter => "quality_filter",
            StepName::Alignment => "alignment",
            StepName::Georeference => "georeference",
            StepName::PruneMarkers => "prune_markers",
            StepName::Scalebars => "scalebars",
            StepName::AlignRegion => "align_region",
            StepName::OptimizeCameras => "optimize_cameras",
            StepName::FilterUncertainty => "filter_uncertainty",
            StepName::FilterProjectionAccuracy => "filter_projection_accuracy",
            StepName::FilterReprojection => "filter_reprojection",
            StepName::DepthMaps => "depth_maps",
            StepName::DenseCloud => "dense_cloud",
            StepName::Mesh => "mesh",
            StepName::Texture => "texture",
            StepName::Dem => "dem",
            StepName::Orthomosaic => "orthomosaic",
            StepName::Export => "export",
        }
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a job or of one of its steps.
///
/// `Skip` is only ever set externally (operator override); the pipeline
/// itself never writes it, but honors it like `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Processing,
    Done,
    Failed,
    Skip,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Processing => "processing",
            Status::Done => "done",
            Status::Failed => "failed",
            Status::Skip => "skip",
        }
    }

    /// A step in this state must never be re-executed for the same job.
    pub fn is_settled(&self) -> bool {
        matches!(self, Status::Done | Status::Skip)
    }
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Status::Pending),
            "processing" => Ok(Status::Processing),
            "done" => Ok(Status::Done),
            "failed" => Ok(Status::Failed),
            "skip" => Ok(Status::Skip),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional metric produced by a step, persisted alongside the processing
/// record — never conflated with the step's status.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepMetric {
    /// A count (aligned images, removed points, pruned markers, ...).
    Count(u64),
    /// A continuous measure (georeferencing error in metres, ...).
    Value(f64),
    /// An artifact-created flag (export produced output, ...).
    Flag(bool),
}

impl StepMetric {
    pub fn to_json(&self) -> serde_json::Value {
        match *self {
            StepMetric::Count(n) => serde_json::json!(n),
            StepMetric::Value(v) => serde_json::json!(v),
            StepMetric::Flag(b) => serde_json::json!(b),
        }
    }
}

/// What the step executor did for one step of one job.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Step disabled in settings; no status transition, action not invoked.
    Skipped,
    /// Step already `done` or `skip` in the status store; action not invoked.
    AlreadyDone,
    /// Action ran and returned normally.
    Succeeded(Option<StepMetric>),
    /// Action ran and failed; the reason is captured, the job continues.
    Failed(String),
}

impl ExecutionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ExecutionOutcome::Failed(_))
    }

    pub fn ran(&self) -> bool {
        matches!(
            self,
            ExecutionOutcome::Succeeded(_) | ExecutionOutcome::Failed(_)
        )
    }
}
