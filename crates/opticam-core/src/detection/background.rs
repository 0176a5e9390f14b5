use ndarray::Array2;
use rayon::prelude::*;

use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::stats::sigma_clipped_stats;

/// Sigma used when clipping sources out of each background tile.
const TILE_CLIP_SIGMA: f64 = 3.0;
const TILE_CLIP_ITERATIONS: usize = 5;
/// Tiles with fewer usable pixels than this borrow the global estimate.
const MIN_TILE_PIXELS: usize = 16;

/// Smooth background level and noise maps for an image.
#[derive(Clone, Debug)]
pub struct BackgroundMap {
    pub level: Array2<f32>,
    pub rms: Array2<f32>,
}

/// Estimate the background with a mesh of sigma-clipped tiles.
///
/// Each `tile`×`tile` cell yields a clipped median and standard deviation;
/// values between tile centres are bilinearly interpolated. Pixels with a
/// non-zero `mask` entry or a non-finite value are ignored.
pub fn estimate_background(
    data: &Array2<f32>,
    mask: Option<&Array2<u8>>,
    tile: usize,
) -> BackgroundMap {
    let (h, w) = data.dim();
    let tile = tile.max(1);
    let ny = h.div_ceil(tile).max(1);
    let nx = w.div_ceil(tile).max(1);

    let usable = |row: usize, col: usize| {
        data[[row, col]].is_finite() && mask.map_or(true, |m| m[[row, col]] == 0)
    };

    let tile_stats: Vec<Option<(f32, f32)>> = (0..ny * nx)
        .into_par_iter()
        .map(|idx| {
            let (ty, tx) = (idx / nx, idx % nx);
            let mut values = Vec::with_capacity(tile * tile);
            for row in ty * tile..((ty + 1) * tile).min(h) {
                for col in tx * tile..((tx + 1) * tile).min(w) {
                    if usable(row, col) {
                        values.push(data[[row, col]]);
                    }
                }
            }
            if values.len() < MIN_TILE_PIXELS {
                return None;
            }
            sigma_clipped_stats(&values, TILE_CLIP_SIGMA, TILE_CLIP_ITERATIONS)
                .map(|s| (s.median as f32, s.std as f32))
        })
        .collect();

    // Global fallback for sparse tiles.
    let global = {
        let values: Vec<f32> = data
            .indexed_iter()
            .filter(|((r, c), _)| usable(*r, *c))
            .map(|(_, &v)| v)
            .collect();
        sigma_clipped_stats(&values, TILE_CLIP_SIGMA, TILE_CLIP_ITERATIONS)
            .map(|s| (s.median as f32, s.std as f32))
            .unwrap_or((0.0, 0.0))
    };
    let grid: Vec<(f32, f32)> = tile_stats.into_iter().map(|s| s.unwrap_or(global)).collect();

    let centre = |i: usize, n: usize| {
        let start = i * tile;
        let end = ((i + 1) * tile).min(n);
        (start + end - 1) as f64 / 2.0
    };
    let cy: Vec<f64> = (0..ny).map(|i| centre(i, h)).collect();
    let cx: Vec<f64> = (0..nx).map(|i| centre(i, w)).collect();

    let interpolate_row = |row: usize| -> Vec<(f32, f32)> {
        let (y0, y1, fy) = bracket(&cy, row as f64);
        (0..w)
            .map(|col| {
                let (x0, x1, fx) = bracket(&cx, col as f64);
                let g = |yy: usize, xx: usize| grid[yy * nx + xx];
                let lerp = |a: (f32, f32), b: (f32, f32), t: f32| {
                    (a.0 + (b.0 - a.0) * t, a.1 + (b.1 - a.1) * t)
                };
                let top = lerp(g(y0, x0), g(y0, x1), fx);
                let bottom = lerp(g(y1, x0), g(y1, x1), fx);
                lerp(top, bottom, fy)
            })
            .collect()
    };

    let rows: Vec<Vec<(f32, f32)>> = if h * w >= PARALLEL_PIXEL_THRESHOLD {
        (0..h).into_par_iter().map(interpolate_row).collect()
    } else {
        (0..h).map(interpolate_row).collect()
    };

    let mut level = Array2::<f32>::zeros((h, w));
    let mut rms = Array2::<f32>::zeros((h, w));
    for (row, values) in rows.into_iter().enumerate() {
        for (col, (l, s)) in values.into_iter().enumerate() {
            level[[row, col]] = l;
            rms[[row, col]] = s;
        }
    }
    BackgroundMap { level, rms }
}

/// Neighbouring tile indices around `pos` and the interpolation weight,
/// clamped to the outermost tile centres.
fn bracket(centres: &[f64], pos: f64) -> (usize, usize, f32) {
    let last = centres.len() - 1;
    if pos <= centres[0] {
        return (0, 0, 0.0);
    }
    if pos >= centres[last] {
        return (last, last, 0.0);
    }
    let i = centres.partition_point(|&c| c <= pos).saturating_sub(1).min(last - 1);
    let span = centres[i + 1] - centres[i];
    let t = if span > 0.0 { (pos - centres[i]) / span } else { 0.0 };
    (i, i + 1, t as f32)
}
