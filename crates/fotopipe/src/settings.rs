//! Typed per-job configuration.
//!
//! A `Settings` bundle is resolved exactly once when a job starts — from the
//! database via the job's settings group, or from the built-in defaults in
//! standalone mode — and is immutable for the remainder of that job. Both
//! provenance variants yield the same struct.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::StepName;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("No settings group linked to job '{0}'")]
    NoGroupLinked(String),

    #[error("Settings group {0} not found")]
    NotFound(i64),

    #[error("Invalid settings: {0}")]
    Invalid(String),

    #[error("Settings store error: {0}")]
    Store(#[from] crate::db::DatabaseError),
}

/// Per-step enable flags. The three error-reduction filters share one flag —
/// they are applied as a unit or not at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepToggles {
    #[serde(default = "default_true")]
    pub quality_filter: bool,
    #[serde(default = "default_true")]
    pub alignment: bool,
    #[serde(default = "default_true")]
    pub georeference: bool,
    #[serde(default = "default_true")]
    pub prune_markers: bool,
    #[serde(default = "default_true")]
    pub scalebars: bool,
    #[serde(default = "default_true")]
    pub align_region: bool,
    #[serde(default = "default_true")]
    pub optimize: bool,
    #[serde(default = "default_true")]
    pub error_reduction: bool,
    #[serde(default = "default_true")]
    pub depth_maps: bool,
    #[serde(default = "default_true")]
    pub dense_cloud: bool,
    #[serde(default = "default_true")]
    pub mesh: bool,
    #[serde(default = "default_true")]
    pub texture: bool,
    #[serde(default = "default_true")]
    pub dem: bool,
    #[serde(default = "default_true")]
    pub orthomosaic: bool,
    #[serde(default = "default_true")]
    pub export: bool,
}

fn default_true() -> bool {
    true
}

impl Default for StepToggles {
    fn default() -> Self {
        Self {
            quality_filter: true,
            alignment: true,
            georeference: true,
            prune_markers: true,
            scalebars: true,
            align_region: true,
            optimize: true,
            error_reduction: true,
            depth_maps: true,
            dense_cloud: true,
            mesh: true,
            texture: true,
            dem: true,
            orthomosaic: true,
            export: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualitySettings {
    /// Cameras with an estimated image quality below this are disabled.
    #[serde(default = "default_quality_threshold")]
    pub threshold: f64,
}

fn default_quality_threshold() -> f64 {
    0.6
}

impl Default for QualitySettings {
    fn default() -> Self {
        Self { threshold: 0.6 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentSettings {
    #[serde(default = "default_keypoint_limit")]
    pub keypoint_limit: u32,
    #[serde(default = "default_tiepoint_limit")]
    pub tiepoint_limit: u32,
    #[serde(default = "default_true")]
    pub generic_preselection: bool,
    #[serde(default = "default_true")]
    pub reference_preselection: bool,
}

fn default_keypoint_limit() -> u32 {
    40_000
}

fn default_tiepoint_limit() -> u32 {
    10_000
}

impl Default for AlignmentSettings {
    fn default() -> Self {
        Self {
            keypoint_limit: 40_000,
            tiepoint_limit: 10_000,
            generic_preselection: true,
            reference_preselection: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoreferenceSettings {
    /// EPSG code of the project coordinate reference system.
    #[serde(default = "default_crs_epsg")]
    pub crs_epsg: u32,
    /// Name of the reference file inside the project folder
    /// (CSV, `name,x,y,z`).
    #[serde(default = "default_targets_file")]
    pub targets_file: String,
}

fn default_crs_epsg() -> u32 {
    32630
}

fn default_targets_file() -> String {
    "targets.txt".to_string()
}

impl Default for GeoreferenceSettings {
    fn default() -> Self {
        Self {
            crs_epsg: 32630,
            targets_file: "targets.txt".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerSettings {
    /// Markers with fewer projections than this are excluded from
    /// referencing.
    #[serde(default = "default_min_projections")]
    pub min_projections: u32,
}

fn default_min_projections() -> u32 {
    3
}

impl Default for MarkerSettings {
    fn default() -> Self {
        Self { min_projections: 3 }
    }
}

/// A known physical distance between two coded markers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalebarSpec {
    pub marker_a: u32,
    pub marker_b: u32,
    pub distance_m: f64,
}

/// Camera model parameters fitted during optimization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationSettings {
    pub fit_f: bool,
    pub fit_cx: bool,
    pub fit_cy: bool,
    pub fit_b1: bool,
    pub fit_b2: bool,
    pub fit_k1: bool,
    pub fit_k2: bool,
    pub fit_k3: bool,
    pub fit_k4: bool,
    pub fit_p1: bool,
    pub fit_p2: bool,
    pub adaptive_fitting: bool,
    pub tiepoint_covariance: bool,
}

impl Default for OptimizationSettings {
    fn default() -> Self {
        Self {
            fit_f: true,
            fit_cx: true,
            fit_cy: true,
            fit_b1: false,
            fit_b2: false,
            fit_k1: true,
            fit_k2: true,
            fit_k3: true,
            fit_k4: false,
            fit_p1: true,
            fit_p2: true,
            adaptive_fitting: false,
            tiepoint_covariance: true,
        }
    }
}

/// One error-reduction pass: remove the worst `percent` of tie points by
/// the criterion score, never cutting below `floor`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterSettings {
    pub percent: f64,
    pub floor: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepthFilter {
    Mild,
    Moderate,
    Aggressive,
}

impl DepthFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepthFilter::Mild => "mild",
            DepthFilter::Moderate => "moderate",
            DepthFilter::Aggressive => "aggressive",
        }
    }
}

impl std::str::FromStr for DepthFilter {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "mild" => Ok(DepthFilter::Mild),
            "moderate" => Ok(DepthFilter::Moderate),
            "aggressive" => Ok(DepthFilter::Aggressive),
            other => Err(format!("unknown depth filter '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthMapSettings {
    /// Image downscale factor: 1 = ultra, 2 = high, 4 = medium, 8 = low,
    /// 16 = lowest.
    #[serde(default = "default_depth_downscale")]
    pub downscale: u32,
    #[serde(default = "default_depth_filter")]
    pub filter_mode: DepthFilter,
    #[serde(default = "default_true")]
    pub reuse_depth: bool,
    #[serde(default = "default_max_neighbors")]
    pub max_neighbors: i32,
}

fn default_depth_downscale() -> u32 {
    2
}

fn default_depth_filter() -> DepthFilter {
    DepthFilter::Moderate
}

fn default_max_neighbors() -> i32 {
    16
}

impl Default for DepthMapSettings {
    fn default() -> Self {
        Self {
            downscale: 2,
            filter_mode: DepthFilter::Moderate,
            reuse_depth: true,
            max_neighbors: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseCloudSettings {
    /// Keep per-point confidence values in the dense cloud.
    #[serde(default = "default_true")]
    pub point_confidence: bool,
}

impl Default for DenseCloudSettings {
    fn default() -> Self {
        Self {
            point_confidence: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaceCount {
    Low,
    Medium,
    High,
}

impl FaceCount {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaceCount::Low => "low",
            FaceCount::Medium => "medium",
            FaceCount::High => "high",
        }
    }
}

impl std::str::FromStr for FaceCount {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "low" => Ok(FaceCount::Low),
            "medium" => Ok(FaceCount::Medium),
            "high" => Ok(FaceCount::High),
            other => Err(format!("unknown face count '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshSettings {
    #[serde(default = "default_face_count")]
    pub face_count: FaceCount,
}

fn default_face_count() -> FaceCount {
    FaceCount::High
}

impl Default for MeshSettings {
    fn default() -> Self {
        Self {
            face_count: FaceCount::High,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextureSettings {
    #[serde(default = "default_texture_size")]
    pub size: u32,
    #[serde(default = "default_true")]
    pub ghosting_filter: bool,
}

fn default_texture_size() -> u32 {
    8192
}

impl Default for TextureSettings {
    fn default() -> Self {
        Self {
            size: 8192,
            ghosting_filter: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    Disabled,
    Enabled,
    Extrapolated,
}

impl Interpolation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interpolation::Disabled => "disabled",
            Interpolation::Enabled => "enabled",
            Interpolation::Extrapolated => "extrapolated",
        }
    }
}

impl std::str::FromStr for Interpolation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "disabled" => Ok(Interpolation::Disabled),
            "enabled" => Ok(Interpolation::Enabled),
            "extrapolated" => Ok(Interpolation::Extrapolated),
            other => Err(format!("unknown interpolation mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemSettings {
    #[serde(default = "default_interpolation")]
    pub interpolation: Interpolation,
    /// Ground resolution in metres; 0 lets the engine choose.
    #[serde(default)]
    pub resolution: f64,
}

fn default_interpolation() -> Interpolation {
    Interpolation::Enabled
}

impl Default for DemSettings {
    fn default() -> Self {
        Self {
            interpolation: Interpolation::Enabled,
            resolution: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendingMode {
    Average,
    Mosaic,
    Disabled,
}

impl BlendingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlendingMode::Average => "average",
            BlendingMode::Mosaic => "mosaic",
            BlendingMode::Disabled => "disabled",
        }
    }
}

impl std::str::FromStr for BlendingMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "average" => Ok(BlendingMode::Average),
            "mosaic" => Ok(BlendingMode::Mosaic),
            "disabled" => Ok(BlendingMode::Disabled),
            other => Err(format!("unknown blending mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrthomosaicSettings {
    #[serde(default = "default_blending")]
    pub blending: BlendingMode,
    #[serde(default = "default_true")]
    pub hole_filling: bool,
}

fn default_blending() -> BlendingMode {
    BlendingMode::Mosaic
}

impl Default for OrthomosaicSettings {
    fn default() -> Self {
        Self {
            blending: BlendingMode::Mosaic,
            hole_filling: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportSettings {
    #[serde(default = "default_true")]
    pub model: bool,
    #[serde(default = "default_true")]
    pub report: bool,
    #[serde(default = "default_true")]
    pub orthomosaic: bool,
    #[serde(default = "default_true")]
    pub dem: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            model: true,
            report: true,
            orthomosaic: true,
            dem: true,
        }
    }
}

/// The full configuration bundle controlling one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub steps: StepToggles,
    #[serde(default)]
    pub quality: QualitySettings,
    #[serde(default)]
    pub alignment: AlignmentSettings,
    #[serde(default)]
    pub georeference: GeoreferenceSettings,
    #[serde(default)]
    pub markers: MarkerSettings,
    #[serde(default)]
    pub scalebars: Vec<ScalebarSpec>,
    #[serde(default)]
    pub optimization: OptimizationSettings,
    #[serde(default = "default_uncertainty")]
    pub uncertainty: FilterSettings,
    #[serde(default = "default_projection_accuracy")]
    pub projection_accuracy: FilterSettings,
    #[serde(default = "default_reprojection")]
    pub reprojection: FilterSettings,
    #[serde(default)]
    pub depth_maps: DepthMapSettings,
    #[serde(default)]
    pub dense_cloud: DenseCloudSettings,
    #[serde(default)]
    pub mesh: MeshSettings,
    #[serde(default)]
    pub texture: TextureSettings,
    #[serde(default)]
    pub dem: DemSettings,
    #[serde(default)]
    pub orthomosaic: OrthomosaicSettings,
    #[serde(default)]
    pub export: ExportSettings,
}

fn default_uncertainty() -> FilterSettings {
    FilterSettings {
        percent: 20.0,
        floor: 10.0,
    }
}

fn default_projection_accuracy() -> FilterSettings {
    FilterSettings {
        percent: 20.0,
        floor: 5.0,
    }
}

fn default_reprojection() -> FilterSettings {
    FilterSettings {
        percent: 20.0,
        floor: 0.9,
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            steps: StepToggles::default(),
            quality: QualitySettings::default(),
            alignment: AlignmentSettings::default(),
            georeference: GeoreferenceSettings::default(),
            markers: MarkerSettings::default(),
            scalebars: Vec::new(),
            optimization: OptimizationSettings::default(),
            uncertainty: default_uncertainty(),
            projection_accuracy: default_projection_accuracy(),
            reprojection: default_reprojection(),
            depth_maps: DepthMapSettings::default(),
            dense_cloud: DenseCloudSettings::default(),
            mesh: MeshSettings::default(),
            texture: TextureSettings::default(),
            dem: DemSettings::default(),
            orthomosaic: OrthomosaicSettings::default(),
            export: ExportSettings::default(),
        }
    }
}

impl Settings {
    /// The built-in bundle used when no database is involved.
    pub fn standalone() -> Self {
        Self::default()
    }

    /// Enable flag for a step in the fixed sequence. The three filter
    /// steps share the `error_reduction` toggle.
    pub fn enabled_for(&self, step: StepName) -> bool {
        match step {
            StepName::QualityFilter => self.steps.quality_filter,
            StepName::Alignment => self.steps.alignment,
            StepName::Georeference => self.steps.georeference,
            StepName::PruneMarkers => self.steps.prune_markers,
            StepName::Scalebars => self.steps.scalebars,
            StepName::AlignRegion => self.steps.align_region,
            StepName::OptimizeCameras => self.steps.optimize,
            StepName::FilterUncertainty
            | StepName::FilterProjectionAccuracy
            | StepName::FilterReprojection => self.steps.error_reduction,
            StepName::DepthMaps => self.steps.depth_maps,
            StepName::DenseCloud => self.steps.dense_cloud,
            StepName::Mesh => self.steps.mesh,
            StepName::Texture => self.steps.texture,
            StepName::Dem => self.steps.dem,
            StepName::Orthomosaic => self.steps.orthomosaic,
            StepName::Export => self.steps.export,
        }
    }

    /// Validates the bundle once at resolution time; use sites may then
    /// trust the values.
    pub fn validate(&self) -> Result<(), SettingsError> {
        for (name, filter) in [
            ("uncertainty", &self.uncertainty),
            ("projection_accuracy", &self.projection_accuracy),
            ("reprojection", &self.reprojection),
        ] {
            if !(0.0..=100.0).contains(&filter.percent) {
                return Err(SettingsError::Invalid(format!(
                    "{} percent must be within 0-100, got {}",
                    name, filter.percent
                )));
            }
            if filter.floor < 0.0 {
                return Err(SettingsError::Invalid(format!(
                    "{} floor must be non-negative, got {}",
                    name, filter.floor
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.quality.threshold) {
            return Err(SettingsError::Invalid(format!(
                "quality threshold must be within 0-1, got {}",
                self.quality.threshold
            )));
        }

        if ![1, 2, 4, 8, 16].contains(&self.depth_maps.downscale) {
            return Err(SettingsError::Invalid(format!(
                "depth map downscale must be one of 1, 2, 4, 8, 16, got {}",
                self.depth_maps.downscale
            )));
        }

        if self.texture.size == 0 {
            return Err(SettingsError::Invalid(
                "texture size must be positive".to_string(),
            ));
        }

        for bar in &self.scalebars {
            if bar.distance_m <= 0.0 {
                return Err(SettingsError::Invalid(format!(
                    "scalebar {}-{} distance must be positive",
                    bar.marker_a, bar.marker_b
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standalone_defaults_are_valid() {
        Settings::standalone().validate().unwrap();
    }

    #[test]
    fn test_default_filter_parameters() {
        let s = Settings::standalone();
        assert_eq!(s.uncertainty.percent, 20.0);
        assert_eq!(s.uncertainty.floor, 10.0);
        assert_eq!(s.projection_accuracy.floor, 5.0);
        assert_eq!(s.reprojection.floor, 0.9);
    }

    #[test]
    fn test_filter_steps_share_one_toggle() {
        let mut s = Settings::standalone();
        s.steps.error_reduction = false;
        assert!(!s.enabled_for(StepName::FilterUncertainty));
        assert!(!s.enabled_for(StepName::FilterProjectionAccuracy));
        assert!(!s.enabled_for(StepName::FilterReprojection));
        assert!(s.enabled_for(StepName::Alignment));
    }

    #[test]
    fn test_percent_out_of_range_rejected() {
        let mut s = Settings::standalone();
        s.reprojection.percent = 120.0;
        assert!(matches!(s.validate(), Err(SettingsError::Invalid(_))));
    }

    #[test]
    fn test_bad_downscale_rejected() {
        let mut s = Settings::standalone();
        s.depth_maps.downscale = 3;
        assert!(matches!(s.validate(), Err(SettingsError::Invalid(_))));
    }

    #[test]
    fn test_negative_scalebar_rejected() {
        let mut s = Settings::standalone();
        s.scalebars.push(ScalebarSpec {
            marker_a: 1,
            marker_b: 2,
            distance_m: -0.5,
        });
        assert!(matches!(s.validate(), Err(SettingsError::Invalid(_))));
    }

    #[test]
    fn test_deserializes_from_partial_json() {
        let s: Settings = serde_json::from_str(
            r#"{ "quality": { "threshold": 0.5 }, "steps": { "export": false } }"#,
        )
        .unwrap();
        assert_eq!(s.quality.threshold, 0.5);
        assert!(!s.steps.export);
        // Everything else falls back to defaults.
        assert_eq!(s.alignment.keypoint_limit, 40_000);
        assert!(s.steps.mesh);
    }

    #[test]
    fn test_categorical_round_trips() {
        use std::str::FromStr;
        for mode in [DepthFilter::Mild, DepthFilter::Moderate, DepthFilter::Aggressive] {
            assert_eq!(DepthFilter::from_str(mode.as_str()).unwrap(), mode);
        }
        for mode in [
            Interpolation::Disabled,
            Interpolation::Enabled,
            Interpolation::Extrapolated,
        ] {
            assert_eq!(Interpolation::from_str(mode.as_str()).unwrap(), mode);
        }
        for mode in [BlendingMode::Average, BlendingMode::Mosaic, BlendingMode::Disabled] {
            assert_eq!(BlendingMode::from_str(mode.as_str()).unwrap(), mode);
        }
        for fc in [FaceCount::Low, FaceCount::Medium, FaceCount::High] {
            assert_eq!(FaceCount::from_str(fc.as_str()).unwrap(), fc);
        }
    }
}
