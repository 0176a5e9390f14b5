use ndarray::{Array2, Axis};
use rayon::prelude::*;

use crate::consts::PARALLEL_PIXEL_THRESHOLD;

/// Separable Gaussian blur with edge clamping.
pub fn gaussian_blur(data: &Array2<f32>, sigma: f32) -> Array2<f32> {
    if sigma <= 0.0 {
        return data.clone();
    }
    let kernel = gaussian_kernel(sigma);
    let horizontal = convolve_axis(data, &kernel, Axis(1));
    convolve_axis(&horizontal, &kernel, Axis(0))
}

/// Factor by which [`gaussian_blur`] scales the standard deviation of
/// uncorrelated pixel noise.
pub fn noise_gain(sigma: f32) -> f32 {
    if sigma <= 0.0 {
        return 1.0;
    }
    // sqrt of the 2D kernel's sum of squares; the 2D kernel is the outer
    // product of the 1D one.
    gaussian_kernel(sigma).iter().map(|k| k * k).sum()
}

fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (sigma * 3.0).ceil() as usize;
    let s2 = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (0..=2 * radius)
        .map(|i| {
            let x = i as f32 - radius as f32;
            (-x * x / s2).exp()
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= sum);
    kernel
}

/// 1D convolution along `axis`: `Axis(1)` runs along rows, `Axis(0)` down columns.
fn convolve_axis(data: &Array2<f32>, kernel: &[f32], axis: Axis) -> Array2<f32> {
    let (h, w) = data.dim();
    let radius = kernel.len() as isize / 2;
    let along_rows = axis == Axis(1);
    let limit = if along_rows { w } else { h } as isize;

    let pixel = |row: usize, col: usize| -> f32 {
        let centre = if along_rows { col } else { row } as isize;
        kernel
            .iter()
            .enumerate()
            .map(|(ki, &kv)| {
                let src = (centre + ki as isize - radius).clamp(0, limit - 1) as usize;
                let v = if along_rows { data[[row, src]] } else { data[[src, col]] };
                v * kv
            })
            .sum()
    };

    let mut result = Array2::<f32>::zeros((h, w));
    if h * w >= PARALLEL_PIXEL_THRESHOLD {
        result
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(row, mut out)| {
                for col in 0..w {
                    out[col] = pixel(row, col);
                }
            });
    } else {
        for ((row, col), out) in result.indexed_iter_mut() {
            *out = pixel(row, col);
        }
    }
    result
}
