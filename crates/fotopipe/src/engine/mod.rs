//! Reconstruction engine interface.
//!
//! The heavy computation — matching, alignment, dense reconstruction,
//! meshing, texturing, DEM and orthomosaic generation — happens inside an
//! external, closed-source engine. The pipeline depends on nothing about
//! its internals beyond "call a capability, get a metric or a failure".

pub mod remote;
pub mod sim;

use std::fmt;
use std::path::Path;

use thiserror::Error;

use crate::settings::{
    AlignmentSettings, BlendingMode, DenseCloudSettings, DepthMapSettings, ExportSettings,
    FaceCount, Interpolation, OptimizationSettings, ScalebarSpec,
};

pub use remote::RemoteEngine;
pub use sim::SimEngine;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine process failed to start: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("engine I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine protocol error: {0}")]
    Protocol(String),

    #[error("{op} failed: {message}")]
    Capability { op: String, message: String },

    #[error("no project loaded")]
    NoProject,
}

/// Ranking criterion for the tie-point outlier filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterCriterion {
    ReconstructionUncertainty,
    ProjectionAccuracy,
    ReprojectionError,
}

impl FilterCriterion {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterCriterion::ReconstructionUncertainty => "reconstruction_uncertainty",
            FilterCriterion::ProjectionAccuracy => "projection_accuracy",
            FilterCriterion::ReprojectionError => "reprojection_error",
        }
    }
}

impl fmt::Display for FilterCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One capability per pipeline step, plus the fine-grained queries the
/// error-reduction passes need. Calls are synchronous and blocking; a call
/// runs to completion or failure — there is no cancellation.
pub trait Engine {
    /// Opens the project at `location`. Called before the step sequence;
    /// a failure here is an orchestrator-level defect, not a step failure.
    fn load_project(&mut self, location: &Path) -> Result<(), EngineError>;

    /// Estimates image quality for cameras that don't carry a value yet and
    /// disables those below `threshold`. Returns the number of cameras
    /// disabled by this call.
    fn estimate_image_quality(&mut self, threshold: f64) -> Result<u64, EngineError>;

    /// Detects coded markers, matches photos and aligns cameras. Returns
    /// the number of aligned cameras.
    fn align_cameras(&mut self, params: &AlignmentSettings) -> Result<u64, EngineError>;

    /// Sets the CRS and imports target references from `targets`. Returns
    /// the number of referenced markers.
    fn import_references(&mut self, crs_epsg: u32, targets: &Path) -> Result<u64, EngineError>;

    /// Excludes markers with fewer than `min_projections` projections from
    /// referencing. Returns the number excluded.
    fn prune_markers(&mut self, min_projections: u32) -> Result<u64, EngineError>;

    /// Creates scalebars between marker pairs. Returns the number created.
    fn insert_scalebars(&mut self, bars: &[ScalebarSpec]) -> Result<u64, EngineError>;

    /// Rotates the reconstruction region to the coordinate grid.
    fn align_region(&mut self) -> Result<(), EngineError>;

    /// Re-optimizes camera parameters.
    fn optimize_cameras(&mut self, params: &OptimizationSettings) -> Result<(), EngineError>;

    /// Criterion scores of all valid tie points, unordered.
    fn point_errors(&mut self, criterion: FilterCriterion) -> Result<Vec<f64>, EngineError>;

    /// Removes valid tie points whose criterion score exceeds `threshold`.
    /// Returns the number removed.
    fn remove_points(
        &mut self,
        criterion: FilterCriterion,
        threshold: f64,
    ) -> Result<u64, EngineError>;

    /// Positional residuals of enabled, referenced markers in a local
    /// tangent frame, metres.
    fn marker_residuals(&mut self) -> Result<Vec<f64>, EngineError>;

    fn build_depth_maps(&mut self, params: &DepthMapSettings) -> Result<(), EngineError>;

    /// Returns the dense cloud point count.
    fn build_dense_cloud(&mut self, params: &DenseCloudSettings) -> Result<u64, EngineError>;

    /// Returns the mesh face count.
    fn build_mesh(&mut self, face_count: FaceCount) -> Result<u64, EngineError>;

    fn build_texture(&mut self, size: u32, ghosting_filter: bool) -> Result<(), EngineError>;

    fn build_dem(&mut self, interpolation: Interpolation, resolution: f64)
        -> Result<(), EngineError>;

    fn build_orthomosaic(
        &mut self,
        blending: BlendingMode,
        hole_filling: bool,
    ) -> Result<(), EngineError>;

    /// Writes the selected products next to the project. Returns whether
    /// any artifact was produced.
    fn export_products(
        &mut self,
        location: &Path,
        formats: &ExportSettings,
    ) -> Result<bool, EngineError>;
}
