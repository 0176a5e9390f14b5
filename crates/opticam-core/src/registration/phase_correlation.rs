//! Coarse translation estimate by FFT phase correlation.

use ndarray::Array2;
use num_complex::Complex;
use rustfft::FftPlanner;

use crate::error::{ReductionError, Result};

use super::transform::Point;

/// Estimate how far `target` is displaced relative to `reference`.
///
/// A feature at `(x, y)` in the reference appears near `(x + dx, y + dy)` in
/// the target. Non-finite pixels are treated as the image median.
pub fn estimate_shift(reference: &Array2<f32>, target: &Array2<f32>) -> Result<Point> {
    let (h, w) = reference.dim();
    if target.dim() != (h, w) {
        return Err(ReductionError::DimensionMismatch {
            expected: (h, w),
            actual: target.dim(),
        });
    }
    if h < 2 || w < 2 {
        return Ok(Point::default());
    }

    let ref_fft = fft2d(&prepare(reference));
    let tgt_fft = fft2d(&prepare(target));
    let correlation = ifft2d(&normalized_cross_power(&ref_fft, &tgt_fft));
    let (peak_row, peak_col) = find_peak(&correlation);

    // Convert to signed offset (handle wrap-around)
    let dy = if peak_row > h / 2 {
        peak_row as f64 - h as f64
    } else {
        peak_row as f64
    };
    let dx = if peak_col > w / 2 {
        peak_col as f64 - w as f64
    } else {
        peak_col as f64
    };
    let (sub_dy, sub_dx) = refine_peak_paraboloid(&correlation, peak_row, peak_col);

    Ok(Point::new(dx + sub_dx, dy + sub_dy))
}

/// Median-subtract and Hann-window an image to suppress edge leakage.
fn prepare(data: &Array2<f32>) -> Array2<f64> {
    let (h, w) = data.dim();
    let mut finite: Vec<f32> = data.iter().copied().filter(|v| v.is_finite()).collect();
    let median = crate::stats::median_in_place(&mut finite).unwrap_or(0.0) as f64;

    let mut result = Array2::<f64>::zeros((h, w));
    for row in 0..h {
        let wy = 0.5 * (1.0 - (std::f64::consts::TAU * row as f64 / h as f64).cos());
        for col in 0..w {
            let wx = 0.5 * (1.0 - (std::f64::consts::TAU * col as f64 / w as f64).cos());
            let v = data[[row, col]];
            let v = if v.is_finite() { v as f64 - median } else { 0.0 };
            result[[row, col]] = v * wy * wx;
        }
    }
    result
}

/// 2D FFT: row-wise FFT, then column-wise FFT.
fn fft2d(data: &Array2<f64>) -> Array2<Complex<f64>> {
    let (h, w) = data.dim();
    let mut planner = FftPlanner::new();
    let fft_row = planner.plan_fft_forward(w);
    let fft_col = planner.plan_fft_forward(h);

    let mut result = data.mapv(|v| Complex::new(v, 0.0));

    for mut row in result.rows_mut() {
        let mut row_data: Vec<Complex<f64>> = row.to_vec();
        fft_row.process(&mut row_data);
        row.assign(&ndarray::ArrayView1::from(row_data.as_slice()));
    }
    for mut col in result.columns_mut() {
        let mut col_data: Vec<Complex<f64>> = col.to_vec();
        fft_col.process(&mut col_data);
        col.assign(&ndarray::ArrayView1::from(col_data.as_slice()));
    }
    result
}

/// Inverse 2D FFT, real part, normalized.
fn ifft2d(data: &Array2<Complex<f64>>) -> Array2<f64> {
    let (h, w) = data.dim();
    let mut planner = FftPlanner::new();
    let ifft_row = planner.plan_fft_inverse(w);
    let ifft_col = planner.plan_fft_inverse(h);

    let mut work = data.clone();
    for mut col in work.columns_mut() {
        let mut col_data: Vec<Complex<f64>> = col.to_vec();
        ifft_col.process(&mut col_data);
        col.assign(&ndarray::ArrayView1::from(col_data.as_slice()));
    }
    for mut row in work.rows_mut() {
        let mut row_data: Vec<Complex<f64>> = row.to_vec();
        ifft_row.process(&mut row_data);
        row.assign(&ndarray::ArrayView1::from(row_data.as_slice()));
    }

    let scale = 1.0 / (h * w) as f64;
    work.mapv(|c| c.re * scale)
}

/// `conj(R) · T / |conj(R) · T|`; its inverse transform peaks at the
/// displacement of T relative to R.
fn normalized_cross_power(
    ref_fft: &Array2<Complex<f64>>,
    tgt_fft: &Array2<Complex<f64>>,
) -> Array2<Complex<f64>> {
    let mut result = Array2::<Complex<f64>>::zeros(ref_fft.dim());
    ndarray::Zip::from(&mut result)
        .and(ref_fft)
        .and(tgt_fft)
        .for_each(|out, r, t| {
            let cross = r.conj() * t;
            let mag = cross.norm();
            *out = if mag > 1e-12 {
                cross / mag
            } else {
                Complex::new(0.0, 0.0)
            };
        });
    result
}

fn find_peak(data: &Array2<f64>) -> (usize, usize) {
    let mut best = (0, 0);
    let mut best_val = f64::NEG_INFINITY;
    for ((row, col), &v) in data.indexed_iter() {
        if v > best_val {
            best_val = v;
            best = (row, col);
        }
    }
    best
}

/// Refine peak location using 1D parabola fits through the 3x3 neighborhood,
/// wrapping around the edges of the periodic correlation surface.
///
/// Returns (delta_row, delta_col) clamped to +/- 0.5 pixel.
fn refine_peak_paraboloid(correlation: &Array2<f64>, peak_row: usize, peak_col: usize) -> (f64, f64) {
    let (h, w) = correlation.dim();
    let up = (peak_row + h - 1) % h;
    let down = (peak_row + 1) % h;
    let left = (peak_col + w - 1) % w;
    let right = (peak_col + 1) % w;

    let parabola = |prev: f64, curr: f64, next: f64| {
        let denom = prev - 2.0 * curr + next;
        if denom.abs() > 1e-12 {
            ((prev - next) / (2.0 * denom)).clamp(-0.5, 0.5)
        } else {
            0.0
        }
    };

    let centre = correlation[[peak_row, peak_col]];
    (
        parabola(correlation[[up, peak_col]], centre, correlation[[down, peak_col]]),
        parabola(correlation[[peak_row, left]], centre, correlation[[peak_row, right]]),
    )
}
