//! Per-entity rolling statistics.

pub mod rolling;

pub use rolling::compute_rolling_stats;

/// Arithmetic mean; 0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
