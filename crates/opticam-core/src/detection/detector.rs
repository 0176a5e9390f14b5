use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::registration::Point;

use super::background::{estimate_background, BackgroundMap};
use super::config::DetectionConfig;
use super::deblend::deblend_segment;
use super::segments::label_segments;
use super::smoothing::{gaussian_blur, noise_gain};

/// Gaussian-equivalent shape from second moments.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    pub sigma_major: f64,
    pub sigma_minor: f64,
    /// Major-axis angle from +x, radians.
    pub theta: f64,
}

impl Shape {
    pub fn circular(sigma: f64) -> Self {
        Self {
            sigma_major: sigma,
            sigma_minor: sigma,
            theta: 0.0,
        }
    }

    /// Value of the unit-amplitude Gaussian at offset `(dx, dy)`.
    pub fn profile(&self, dx: f64, dy: f64) -> f64 {
        let (s, c) = self.theta.sin_cos();
        let u = c * dx + s * dy;
        let v = -s * dx + c * dy;
        (-0.5 * (u * u / (self.sigma_major * self.sigma_major)
            + v * v / (self.sigma_minor * self.sigma_minor)))
            .exp()
    }
}

/// A point source found in one image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub pos: Point,
    /// Background-subtracted sum over the segment.
    pub flux: f64,
    /// Background-subtracted peak value.
    pub peak: f64,
    /// Peak over the local background sigma.
    pub peak_sigma: f64,
    pub npix: usize,
    pub shape: Shape,
}

/// Find point sources in `data`.
///
/// Pixels flagged in `mask` take no part in background estimation or
/// segmentation. Results are sorted brightest first.
pub fn detect_sources(
    data: &Array2<f32>,
    mask: Option<&Array2<u8>>,
    config: &DetectionConfig,
) -> Vec<Detection> {
    let (h, w) = data.dim();
    let valid = |row: usize, col: usize| {
        data[[row, col]].is_finite() && mask.map_or(true, |m| m[[row, col]] == 0)
    };

    let BackgroundMap { level, rms } = estimate_background(data, mask, config.tile_size);
    let mut residual = Array2::<f32>::zeros((h, w));
    for ((row, col), out) in residual.indexed_iter_mut() {
        if valid(row, col) {
            *out = data[[row, col]] - level[[row, col]];
        }
    }

    let smoothed = gaussian_blur(&residual, config.smoothing_sigma);
    let gain = noise_gain(config.smoothing_sigma);
    let threshold = config.threshold_sigma as f32;
    let above = Array2::from_shape_fn((h, w), |(row, col)| {
        valid(row, col)
            && smoothed[[row, col]] > threshold * gain * rms[[row, col]].max(f32::EPSILON)
    });

    let mut segments = label_segments(&above, config.connectivity);
    let total_segments = segments.len();
    if let Some(deblend) = &config.deblend {
        segments = segments
            .iter()
            .flat_map(|seg| deblend_segment(seg, &smoothed, config.min_pixels, config.connectivity, deblend))
            .collect();
    }

    let segments_after = segments.len();
    let mut candidates: Vec<Detection> = segments
        .into_iter()
        .filter(|seg| seg.area() >= config.min_pixels)
        .filter(|seg| config.border_width == 0 || !seg.near_border(config.border_width, h, w))
        .filter_map(|seg| {
            let &(peak_row, peak_col) = seg
                .pixels
                .iter()
                .max_by(|a, b| residual[[a.0, a.1]].total_cmp(&residual[[b.0, b.1]]))?;
            let peak = residual[[peak_row, peak_col]] as f64;
            let peak_sigma = peak / rms[[peak_row, peak_col]].max(f32::EPSILON) as f64;
            if peak_sigma < config.min_peak_sigma {
                return None;
            }

            let (mut sum_w, mut sum_x, mut sum_y, mut flux) = (0.0f64, 0.0, 0.0, 0.0);
            for &(row, col) in &seg.pixels {
                let v = residual[[row, col]] as f64;
                flux += v;
                if v > 0.0 {
                    sum_w += v;
                    sum_x += v * col as f64;
                    sum_y += v * row as f64;
                }
            }
            if sum_w <= 0.0 {
                return None;
            }
            let pos = Point::new(sum_x / sum_w, sum_y / sum_w);
            let window = (2.5 * (seg.area() as f64 / std::f64::consts::PI).sqrt()).clamp(3.0, 15.0);
            let shape = moment_shape(&residual, &valid, pos, window)
                .unwrap_or_else(|| Shape::circular((flux / (std::f64::consts::TAU * peak)).sqrt().max(0.5)));

            Some(Detection {
                pos,
                flux,
                peak,
                peak_sigma,
                npix: seg.area(),
                shape,
            })
        })
        .collect();

    let kept = deduplicate(&mut candidates, config.min_separation);
    debug!(
        segments = total_segments,
        deblended = segments_after,
        detections = kept.len(),
        "source detection finished"
    );
    kept
}

/// Keep the most significant of any detections closer than `min_separation`.
fn deduplicate(candidates: &mut [Detection], min_separation: f64) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.peak_sigma.total_cmp(&a.peak_sigma));
    let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len());
    for det in candidates.iter() {
        if kept.iter().all(|k| k.pos.distance(&det.pos) >= min_separation) {
            kept.push(det.clone());
        }
    }
    kept.sort_by(|a, b| b.flux.total_cmp(&a.flux));
    kept
}

/// Second-moment shape within a circular window around `centre`.
fn moment_shape(
    residual: &Array2<f32>,
    valid: &impl Fn(usize, usize) -> bool,
    centre: Point,
    radius: f64,
) -> Option<Shape> {
    let (h, w) = residual.dim();
    let row_lo = (centre.y - radius).floor().max(0.0) as usize;
    let row_hi = ((centre.y + radius).ceil() as usize).min(h.saturating_sub(1));
    let col_lo = (centre.x - radius).floor().max(0.0) as usize;
    let col_hi = ((centre.x + radius).ceil() as usize).min(w.saturating_sub(1));

    let (mut sw, mut sxx, mut syy, mut sxy) = (0.0f64, 0.0, 0.0, 0.0);
    for row in row_lo..=row_hi {
        for col in col_lo..=col_hi {
            let dx = col as f64 - centre.x;
            let dy = row as f64 - centre.y;
            if dx * dx + dy * dy > radius * radius || !valid(row, col) {
                continue;
            }
            let v = residual[[row, col]] as f64;
            sw += v;
            sxx += v * dx * dx;
            syy += v * dy * dy;
            sxy += v * dx * dy;
        }
    }
    if sw <= 0.0 {
        return None;
    }
    let (mxx, myy, mxy) = (sxx / sw, syy / sw, sxy / sw);
    let half_trace = 0.5 * (mxx + myy);
    let disc = (0.25 * (mxx - myy).powi(2) + mxy * mxy).sqrt();
    let major = half_trace + disc;
    let minor = half_trace - disc;
    if minor <= 0.0 || !major.is_finite() {
        return None;
    }
    Some(Shape {
        sigma_major: major.sqrt(),
        sigma_minor: minor.sqrt(),
        theta: 0.5 * (2.0 * mxy).atan2(mxx - myy),
    })
}
