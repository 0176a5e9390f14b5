//! Small robust-statistics helpers shared by calibration, detection and photometry.

use crate::consts::{EPSILON, MAD_TO_SIGMA};

/// Median of a slice, reordering it in place.
///
/// Uses `select_nth_unstable` for O(n) median without full sort.
/// Returns `None` for an empty slice.
pub fn median_in_place(values: &mut [f32]) -> Option<f32> {
    let n = values.len();
    if n == 0 {
        return None;
    }
    if n == 1 {
        return Some(values[0]);
    }
    let mid = n / 2;
    values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    if n % 2 == 1 {
        Some(values[mid])
    } else {
        let upper = values[mid];
        values[..mid].select_nth_unstable_by(mid - 1, |a, b| a.total_cmp(b));
        Some((values[mid - 1] + upper) / 2.0)
    }
}

/// Median of an f64 slice without modifying the input.
pub fn median_f64(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n % 2 == 1 {
        Some(sorted[n / 2])
    } else {
        Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0)
    }
}

/// Robust standard deviation from the median absolute deviation.
pub fn mad_sigma_f64(values: &[f64], median: f64) -> f64 {
    let deviations: Vec<f64> = values.iter().map(|v| (v - median).abs()).collect();
    median_f64(&deviations).unwrap_or(0.0) * MAD_TO_SIGMA
}

/// Mean and population standard deviation.
pub fn mean_stddev(values: &[f32]) -> (f64, f64) {
    let n = values.len() as f64;
    if n == 0.0 {
        return (0.0, 0.0);
    }
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = values
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    (mean, var.sqrt())
}

/// Summary of a sigma-clipped sample.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClippedStats {
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    /// Number of values that survived clipping.
    pub count: usize,
}

/// Iteratively clip values further than `sigma` standard deviations from the
/// median and report statistics of the survivors.
///
/// Stops early when an iteration rejects nothing. Returns `None` when the
/// input is empty.
pub fn sigma_clipped_stats(values: &[f32], sigma: f64, iterations: usize) -> Option<ClippedStats> {
    if values.is_empty() {
        return None;
    }
    let mut kept: Vec<f32> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if kept.is_empty() {
        return None;
    }

    for _ in 0..iterations {
        let mut scratch = kept.clone();
        let median = median_in_place(&mut scratch)? as f64;
        let (_, std) = mean_stddev(&kept);
        if std < EPSILON {
            break;
        }
        let survivors: Vec<f32> = kept
            .iter()
            .copied()
            .filter(|&v| ((v as f64) - median).abs() <= sigma * std)
            .collect();
        if survivors.len() == kept.len() || survivors.is_empty() {
            break;
        }
        kept = survivors;
    }

    let (mean, std) = mean_stddev(&kept);
    let mut scratch = kept.clone();
    let median = median_in_place(&mut scratch)? as f64;
    Some(ClippedStats {
        mean,
        median,
        std,
        count: kept.len(),
    })
}
