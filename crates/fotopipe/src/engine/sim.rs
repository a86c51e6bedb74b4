//! Deterministic in-process engine.
//!
//! Stands in for the real reconstruction engine in tests and demo runs: a
//! fixed synthetic scene, per-capability call counting, and optional fault
//! injection. No I/O, no randomness.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use super::{Engine, EngineError, FilterCriterion};
use crate::settings::{
    AlignmentSettings, BlendingMode, DenseCloudSettings, DepthMapSettings, ExportSettings,
    FaceCount, Interpolation, OptimizationSettings, ScalebarSpec,
};

const CAMERA_COUNT: usize = 24;
const POINT_COUNT: usize = 400;

#[derive(Debug, Clone)]
struct SimCamera {
    quality: Option<f64>,
    enabled: bool,
    aligned: bool,
}

#[derive(Debug, Clone)]
struct SimMarker {
    projections: u32,
    enabled: bool,
    residual_m: f64,
}

pub struct SimEngine {
    loaded: Option<PathBuf>,
    cameras: Vec<SimCamera>,
    points: HashMap<FilterCriterion, Vec<f64>>,
    markers: Vec<SimMarker>,
    depth_built: bool,
    dense_points: u64,
    mesh_faces: u64,
    textured: bool,
    dem_built: bool,
    ortho_built: bool,
    calls: HashMap<&'static str, usize>,
    fail_ops: HashSet<&'static str>,
}

impl Default for SimEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEngine {
    pub fn new() -> Self {
        Self {
            loaded: None,
            cameras: Vec::new(),
            points: HashMap::new(),
            markers: Vec::new(),
            depth_built: false,
            dense_points: 0,
            mesh_faces: 0,
            textured: false,
            dem_built: false,
            ortho_built: false,
            calls: HashMap::new(),
            fail_ops: HashSet::new(),
        }
    }

    /// Makes the named capability fail with an injected error.
    pub fn fail_on(mut self, op: &'static str) -> Self {
        self.fail_ops.insert(op);
        self
    }

    /// Number of times the named capability was invoked.
    pub fn calls(&self, op: &str) -> usize {
        self.calls.get(op).copied().unwrap_or(0)
    }

    fn enter(&mut self, op: &'static str) -> Result<(), EngineError> {
        *self.calls.entry(op).or_insert(0) += 1;
        if self.fail_ops.contains(op) {
            return Err(EngineError::Capability {
                op: op.to_string(),
                message: "injected failure".to_string(),
            });
        }
        if op != "load_project" && self.loaded.is_none() {
            return Err(EngineError::NoProject);
        }
        Ok(())
    }

    fn aligned_count(&self) -> u64 {
        self.cameras.iter().filter(|c| c.aligned).count() as u64
    }

    fn synthetic_scene() -> (Vec<SimCamera>, HashMap<FilterCriterion, Vec<f64>>, Vec<SimMarker>) {
        let cameras = (0..CAMERA_COUNT)
            .map(|_| SimCamera {
                quality: None,
                enabled: true,
                aligned: false,
            })
            .collect();

        let mut points = HashMap::new();
        points.insert(
            FilterCriterion::ReconstructionUncertainty,
            (0..POINT_COUNT).map(|i| (i + 1) as f64 * 0.05).collect(),
        );
        points.insert(
            FilterCriterion::ProjectionAccuracy,
            (0..POINT_COUNT).map(|i| (i + 1) as f64 * 0.02).collect(),
        );
        points.insert(
            FilterCriterion::ReprojectionError,
            (0..POINT_COUNT).map(|i| (i + 1) as f64 * 0.004).collect(),
        );

        let markers = [
            (5, 0.012),
            (4, 0.018),
            (3, 0.022),
            (2, 0.030),
            (6, 0.016),
            (2, 0.040),
        ]
        .iter()
        .map(|&(projections, residual_m)| SimMarker {
            projections,
            enabled: true,
            residual_m,
        })
        .collect();

        (cameras, points, markers)
    }
}

impl Engine for SimEngine {
    fn load_project(&mut self, location: &Path) -> Result<(), EngineError> {
        self.enter("load_project")?;
        let (cameras, points, markers) = Self::synthetic_scene();
        self.cameras = cameras;
        self.points = points;
        self.markers = markers;
        self.loaded = Some(location.to_path_buf());
        Ok(())
    }

    fn estimate_image_quality(&mut self, threshold: f64) -> Result<u64, EngineError> {
        self.enter("estimate_image_quality")?;
        let count = self.cameras.len();
        let mut disabled = 0u64;
        for (i, camera) in self.cameras.iter_mut().enumerate() {
            // Quality is only computed for cameras that don't carry a
            // value yet; re-runs stay cheap.
            if camera.quality.is_none() {
                let spread = i as f64 / (count.max(2) - 1) as f64;
                camera.quality = Some(0.3 + 0.7 * spread);
            }
            if camera.enabled && camera.quality.unwrap_or(1.0) < threshold {
                camera.enabled = false;
                disabled += 1;
            }
        }
        Ok(disabled)
    }

    fn align_cameras(&mut self, _params: &AlignmentSettings) -> Result<u64, EngineError> {
        self.enter("align_cameras")?;
        for camera in self.cameras.iter_mut().filter(|c| c.enabled) {
            camera.aligned = true;
        }
        Ok(self.aligned_count())
    }

    fn import_references(&mut self, _crs_epsg: u32, _targets: &Path) -> Result<u64, EngineError> {
        self.enter("import_references")?;
        Ok(self.markers.len() as u64)
    }

    fn prune_markers(&mut self, min_projections: u32) -> Result<u64, EngineError> {
        self.enter("prune_markers")?;
        let mut pruned = 0u64;
        for marker in &mut self.markers {
            if marker.enabled && marker.projections < min_projections {
                marker.enabled = false;
                pruned += 1;
            }
        }
        Ok(pruned)
    }

    fn insert_scalebars(&mut self, bars: &[ScalebarSpec]) -> Result<u64, EngineError> {
        self.enter("insert_scalebars")?;
        Ok(bars.len() as u64)
    }

    fn align_region(&mut self) -> Result<(), EngineError> {
        self.enter("align_region")?;
        Ok(())
    }

    fn optimize_cameras(&mut self, _params: &OptimizationSettings) -> Result<(), EngineError> {
        self.enter("optimize_cameras")?;
        // Each optimization pass tightens the fit a little.
        for marker in &mut self.markers {
            marker.residual_m *= 0.9;
        }
        Ok(())
    }

    fn point_errors(&mut self, criterion: FilterCriterion) -> Result<Vec<f64>, EngineError> {
        self.enter("point_errors")?;
        Ok(self.points.get(&criterion).cloned().unwrap_or_default())
    }

    fn remove_points(
        &mut self,
        criterion: FilterCriterion,
        threshold: f64,
    ) -> Result<u64, EngineError> {
        self.enter("remove_points")?;
        let values = self.points.entry(criterion).or_default();
        let before = values.len();
        values.retain(|v| *v <= threshold);
        Ok((before - values.len()) as u64)
    }

    fn marker_residuals(&mut self) -> Result<Vec<f64>, EngineError> {
        self.enter("marker_residuals")?;
        Ok(self
            .markers
            .iter()
            .filter(|m| m.enabled)
            .map(|m| m.residual_m)
            .collect())
    }

    fn build_depth_maps(&mut self, _params: &DepthMapSettings) -> Result<(), EngineError> {
        self.enter("build_depth_maps")?;
        if self.aligned_count() == 0 {
            return Err(EngineError::Capability {
                op: "build_depth_maps".to_string(),
                message: "no aligned cameras".to_string(),
            });
        }
        self.depth_built = true;
        Ok(())
    }

    fn build_dense_cloud(&mut self, _params: &DenseCloudSettings) -> Result<u64, EngineError> {
        self.enter("build_dense_cloud")?;
        if !self.depth_built {
            return Err(EngineError::Capability {
                op: "build_dense_cloud".to_string(),
                message: "depth maps missing".to_string(),
            });
        }
        self.dense_points = self.aligned_count() * 5_000;
        Ok(self.dense_points)
    }

    fn build_mesh(&mut self, face_count: FaceCount) -> Result<u64, EngineError> {
        self.enter("build_mesh")?;
        if !self.depth_built {
            return Err(EngineError::Capability {
                op: "build_mesh".to_string(),
                message: "depth maps missing".to_string(),
            });
        }
        let per_camera = match face_count {
            FaceCount::Low => 2_000,
            FaceCount::Medium => 10_000,
            FaceCount::High => 40_000,
        };
        self.mesh_faces = self.aligned_count() * per_camera;
        Ok(self.mesh_faces)
    }

    fn build_texture(&mut self, _size: u32, _ghosting_filter: bool) -> Result<(), EngineError> {
        self.enter("build_texture")?;
        if self.mesh_faces == 0 {
            return Err(EngineError::Capability {
                op: "build_texture".to_string(),
                message: "mesh missing".to_string(),
            });
        }
        self.textured = true;
        Ok(())
    }

    fn build_dem(
        &mut self,
        _interpolation: Interpolation,
        _resolution: f64,
    ) -> Result<(), EngineError> {
        self.enter("build_dem")?;
        if self.dense_points == 0 {
            return Err(EngineError::Capability {
                op: "build_dem".to_string(),
                message: "dense cloud missing".to_string(),
            });
        }
        self.dem_built = true;
        Ok(())
    }

    fn build_orthomosaic(
        &mut self,
        _blending: BlendingMode,
        _hole_filling: bool,
    ) -> Result<(), EngineError> {
        self.enter("build_orthomosaic")?;
        if !self.dem_built {
            return Err(EngineError::Capability {
                op: "build_orthomosaic".to_string(),
                message: "elevation model missing".to_string(),
            });
        }
        self.ortho_built = true;
        Ok(())
    }

    fn export_products(
        &mut self,
        _location: &Path,
        formats: &ExportSettings,
    ) -> Result<bool, EngineError> {
        self.enter("export_products")?;
        let produced = (formats.model && self.mesh_faces > 0)
            || (formats.dem && self.dem_built)
            || (formats.orthomosaic && self.ortho_built)
            || formats.report;
        Ok(produced)
    }
}
