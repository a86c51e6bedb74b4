//! Tie-point selection thresholds for the error-reduction passes.
//!
//! Each pass removes the top share of points ranked by a criterion score,
//! but never with a cutoff below the configured minimum for that criterion:
//! points that already score better than the minimum are left alone even
//! when the percentage asks for more.

/// Cutoff for removing the worst `percent` of `values`, floored at
/// `minimum`.
///
/// Rank convention: `rank = floor(percent / 100 * count)`, clamped to
/// `[0, count - 1]`, indexing the ascending sort. Returns `None` for an
/// empty input (nothing to remove).
pub fn selection_threshold(values: &[f64], percent: f64, minimum: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = ((percent / 100.0) * sorted.len() as f64).floor() as usize;
    let rank = rank.min(sorted.len() - 1);

    Some(sorted[rank].max(minimum))
}
