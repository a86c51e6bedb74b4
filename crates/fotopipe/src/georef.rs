//! Georeferencing accuracy estimation.
//!
//! The engine reports one positional residual per enabled marker, measured
//! in a local tangent frame in metres. The pipeline condenses these into a
//! single root-mean-square figure after every step that can move the
//! reconstruction relative to its reference coordinates.

/// Root-mean-square of per-marker positional residuals, in metres.
///
/// An empty input (no enabled markers with references) yields exactly 0.0,
/// never NaN.
pub fn rms_residual_error(residuals: &[f64]) -> f64 {
    if residuals.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = residuals.iter().map(|r| r * r).sum();
    (sum_sq / residuals.len() as f64).sqrt()
}
