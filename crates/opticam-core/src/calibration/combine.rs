use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_CLIP_ITERATIONS, DEFAULT_CLIP_SIGMA, EPSILON, PARALLEL_PIXEL_THRESHOLD};
use crate::error::{ReductionError, Result};
use crate::stats::median_in_place;

/// Pixel-wise statistic used to merge a stack of frames.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum CombineMethod {
    #[default]
    Median,
    SigmaClippedMean(SigmaClipParams),
}

impl std::fmt::Display for CombineMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Median => write!(f, "median"),
            Self::SigmaClippedMean(p) => {
                write!(f, "sigma-clipped mean ({}σ, {} iter)", p.sigma, p.iterations)
            }
        }
    }
}

/// Parameters for sigma-clipped mean combination.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SigmaClipParams {
    /// Number of rejection iterations.
    pub iterations: usize,
    /// Values beyond mean +/- sigma*stddev are rejected.
    pub sigma: f32,
}

impl Default for SigmaClipParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_CLIP_ITERATIONS,
            sigma: DEFAULT_CLIP_SIGMA,
        }
    }
}

/// Combine equally-sized arrays pixel by pixel.
///
/// Non-finite inputs are ignored; a pixel with no finite input becomes NaN.
/// Parallelizes at the row level for large images.
pub fn combine_arrays(stack: &[&Array2<f32>], method: &CombineMethod) -> Result<Array2<f32>> {
    let first = stack.first().ok_or(ReductionError::EmptySequence)?;
    let (h, w) = first.dim();
    if let Some(bad) = stack.iter().find(|a| a.dim() != (h, w)) {
        return Err(ReductionError::DimensionMismatch {
            expected: (h, w),
            actual: bad.dim(),
        });
    }
    let n = stack.len();

    let combine_row = |row: usize, out: &mut [f32]| {
        let mut values = Vec::with_capacity(n);
        for (col, result) in out.iter_mut().enumerate() {
            values.clear();
            values.extend(stack.iter().map(|a| a[[row, col]]));
            *result = combine_pixel(&mut values, method);
        }
    };

    let mut result = Array2::<f32>::zeros((h, w));
    if h * w >= PARALLEL_PIXEL_THRESHOLD && n > 1 {
        let rows: Vec<Vec<f32>> = (0..h)
            .into_par_iter()
            .map(|row| {
                let mut row_result = vec![0.0f32; w];
                combine_row(row, &mut row_result);
                row_result
            })
            .collect();
        for (row, row_data) in rows.into_iter().enumerate() {
            for (col, val) in row_data.into_iter().enumerate() {
                result[[row, col]] = val;
            }
        }
    } else {
        let mut row_result = vec![0.0f32; w];
        for row in 0..h {
            combine_row(row, &mut row_result);
            for (col, &val) in row_result.iter().enumerate() {
                result[[row, col]] = val;
            }
        }
    }
    Ok(result)
}

fn combine_pixel(values: &mut Vec<f32>, method: &CombineMethod) -> f32 {
    values.retain(|v| v.is_finite());
    if values.is_empty() {
        return f32::NAN;
    }
    match method {
        CombineMethod::Median => median_in_place(values).unwrap_or(f32::NAN),
        CombineMethod::SigmaClippedMean(params) => clipped_mean(values, params),
    }
}

/// Per pixel: compute mean and stddev, reject values more than `sigma` standard
/// deviations from the mean, then recompute the mean from remaining values.
fn clipped_mean(values: &[f32], params: &SigmaClipParams) -> f32 {
    let n = values.len();
    let mut keep = vec![true; n];

    for _ in 0..params.iterations {
        let (mean, stddev) = masked_mean_stddev(values, &keep);
        if (stddev as f64) < EPSILON {
            break;
        }
        let lo = mean - params.sigma * stddev;
        let hi = mean + params.sigma * stddev;
        let mut rejected = false;
        for (i, &v) in values.iter().enumerate() {
            if keep[i] && (v < lo || v > hi) {
                keep[i] = false;
                rejected = true;
            }
        }
        if !rejected {
            break;
        }
    }

    let (mean, _) = masked_mean_stddev(values, &keep);
    if keep.iter().any(|&k| k) {
        mean
    } else {
        // If all values rejected, fall back to full mean
        values.iter().sum::<f32>() / n as f32
    }
}

fn masked_mean_stddev(values: &[f32], keep: &[bool]) -> (f32, f32) {
    let mut sum = 0.0f64;
    let mut count = 0u32;
    for (&v, &k) in values.iter().zip(keep) {
        if k {
            sum += v as f64;
            count += 1;
        }
    }
    if count == 0 {
        return (0.0, 0.0);
    }
    let mean = sum / count as f64;
    let mut var_sum = 0.0f64;
    for (&v, &k) in values.iter().zip(keep) {
        if k {
            let d = v as f64 - mean;
            var_sum += d * d;
        }
    }
    (mean as f32, (var_sum / count as f64).sqrt() as f32)
}
