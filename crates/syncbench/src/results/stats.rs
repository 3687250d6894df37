//! Statistics computation for benchmark samples.

use serde::{Deserialize, Serialize};

/// Trimmed descriptive statistics over one metric's sample series.
///
/// All fields are zero when there were not enough samples left after
/// trimming. Callers detect "too few samples" by that, not by an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatBlock {
    /// Smallest retained sample.
    pub min: f64,
    /// Largest retained sample.
    pub max: f64,
    /// Arithmetic mean of the retained samples.
    pub mean: f64,
    /// Median of the retained samples.
    pub median: f64,
    /// Population standard deviation of the retained samples.
    pub std_dev: f64,
}

impl StatBlock {
    /// Compute statistics over `samples` after discarding the `outliers`
    /// smallest and `outliers` largest values.
    ///
    /// Input order does not matter. If `samples.len() <= 2 * outliers` the
    /// result is all zeros.
    pub fn compute(samples: &[f64], outliers: usize) -> Self {
        if samples.len() <= outliers.saturating_mul(2) {
            return Self::default();
        }

        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);
        let trimmed = &sorted[outliers..sorted.len() - outliers];

        let n = trimmed.len();
        let min = trimmed[0];
        let max = trimmed[n - 1];

        let middle = n / 2;
        let median = if n % 2 == 0 {
            (trimmed[middle - 1] + trimmed[middle]) / 2.0
        } else {
            trimmed[middle]
        };

        let mean = trimmed.iter().sum::<f64>() / n as f64;

        // Population variance (divide by n, not n - 1)
        let variance = trimmed
            .iter()
            .map(|&x| {
                let diff = x - mean;
                diff * diff
            })
            .sum::<f64>()
            / n as f64;

        Self {
            min,
            max,
            mean,
            median,
            std_dev: variance.sqrt(),
        }
    }

    /// Whether every field is zero (the insufficient-data signal).
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
