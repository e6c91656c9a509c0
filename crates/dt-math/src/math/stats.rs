//! Summary statistics over run-level metrics.

use serde::{Deserialize, Serialize};

/// Mean, population standard deviation and range of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub count: usize,
    pub mean: f64,
    /// Population standard deviation (divides by `count`).
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl SummaryStats {
    /// `std_dev / mean`, or `None` when the mean is zero.
    pub fn coefficient_of_variation(&self) -> Option<f64> {
        if self.mean == 0.0 {
            None
        } else {
            Some(self.std_dev / self.mean)
        }
    }
}

/// Summarize a sample. Returns `None` for an empty slice or any non-finite value.
pub fn summarize(values: &[f64]) -> Option<SummaryStats> {
    if values.is_empty() || values.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let count = values.len();
    let n = count as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some(SummaryStats {
        count,
        mean,
        std_dev: var.sqrt(),
        min,
        max,
    })
}
