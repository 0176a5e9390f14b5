use crate::consts::MIN_ANNULUS_PIXELS;
use crate::frame::{mask, CalibratedFrame};
use crate::pipeline::config::Annulus;
use crate::registration::Point;
use crate::stats::sigma_clipped_stats;

const SKY_CLIP_SIGMA: f64 = 3.0;
const SKY_CLIP_ITERATIONS: usize = 5;
const RECENTER_ITERATIONS: usize = 3;

/// Pixels of a circular region around a position.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ApertureSum {
    /// Sum of usable pixel values.
    pub sum: f64,
    /// Usable pixels summed.
    pub count: usize,
    /// Pixels of the circle that lie off the frame.
    pub outside: usize,
    /// Masked pixels left out of the sum (saturated pixels are kept).
    pub invalid: usize,
    pub saturated: bool,
}

impl ApertureSum {
    pub fn is_complete(&self) -> bool {
        self.outside == 0 && self.invalid == 0
    }
}

/// Local sky level and per-pixel variance from a background annulus.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SkyEstimate {
    pub level: f64,
    pub variance: f64,
    pub count: usize,
}

impl SkyEstimate {
    /// Fewer usable annulus pixels than a stable estimate needs.
    pub fn is_sparse(&self) -> bool {
        self.count < MIN_ANNULUS_PIXELS
    }
}

/// Visit every pixel whose centre lies within `radius` of `centre`,
/// including positions off the frame (reported as `None`).
pub(crate) fn for_each_in_circle(
    frame: &CalibratedFrame,
    centre: Point,
    radius: f64,
    mut f: impl FnMut(i64, i64, Option<(f32, u8)>),
) {
    let (h, w) = frame.data.dim();
    let r2 = radius * radius;
    let row_lo = (centre.y - radius).ceil() as i64;
    let row_hi = (centre.y + radius).floor() as i64;
    let col_lo = (centre.x - radius).ceil() as i64;
    let col_hi = (centre.x + radius).floor() as i64;
    for row in row_lo..=row_hi {
        for col in col_lo..=col_hi {
            let dx = col as f64 - centre.x;
            let dy = row as f64 - centre.y;
            if dx * dx + dy * dy > r2 {
                continue;
            }
            let pixel = (row >= 0 && col >= 0 && row < h as i64 && col < w as i64).then(|| {
                let (r, c) = (row as usize, col as usize);
                (frame.data[[r, c]], frame.mask[[r, c]])
            });
            f(row, col, pixel);
        }
    }
}

/// Sum pixel values within `radius` of `centre`.
///
/// Saturation is reported for a mask bit or a calibrated value at or above
/// `saturation`.
pub fn aperture_sum(frame: &CalibratedFrame, centre: Point, radius: f64, saturation: f32) -> ApertureSum {
    let mut out = ApertureSum::default();
    for_each_in_circle(frame, centre, radius, |_, _, pixel| match pixel {
        None => out.outside += 1,
        Some((v, m)) => {
            if m & mask::SATURATED != 0 || v >= saturation {
                out.saturated = true;
            }
            if m & !mask::SATURATED != 0 || !v.is_finite() {
                out.invalid += 1;
            } else {
                out.sum += v as f64;
                out.count += 1;
            }
        }
    });
    out
}

/// Sigma-clipped median and variance of unmasked pixels in the annulus.
/// `None` when no annulus pixel is usable.
pub fn annulus_background(frame: &CalibratedFrame, centre: Point, annulus: &Annulus) -> Option<SkyEstimate> {
    let inner2 = annulus.inner * annulus.inner;
    let mut values = Vec::new();
    for_each_in_circle(frame, centre, annulus.outer, |row, col, pixel| {
        let dx = col as f64 - centre.x;
        let dy = row as f64 - centre.y;
        if dx * dx + dy * dy < inner2 {
            return;
        }
        if let Some((v, 0)) = pixel {
            values.push(v);
        }
    });
    let stats = sigma_clipped_stats(&values, SKY_CLIP_SIGMA, SKY_CLIP_ITERATIONS)?;
    Some(SkyEstimate {
        level: stats.median,
        variance: stats.std * stats.std,
        count: stats.count,
    })
}

/// Sigma-clipped sky over every unmasked pixel of the frame. Stand-in for
/// sources whose annulus has no usable pixel.
pub fn frame_background(frame: &CalibratedFrame) -> Option<SkyEstimate> {
    let values: Vec<f32> = frame
        .data
        .iter()
        .zip(frame.mask.iter())
        .filter(|&(v, &m)| m == 0 && v.is_finite())
        .map(|(&v, _)| v)
        .collect();
    let stats = sigma_clipped_stats(&values, SKY_CLIP_SIGMA, SKY_CLIP_ITERATIONS)?;
    Some(SkyEstimate {
        level: stats.median,
        variance: stats.std * stats.std,
        count: stats.count,
    })
}

/// Move `predicted` to the sky-subtracted centroid within `radius`.
///
/// Falls back to `predicted` when the centroid wanders further than
/// `max_offset` or the aperture holds no positive flux.
pub fn recenter(
    frame: &CalibratedFrame,
    predicted: Point,
    radius: f64,
    sky_level: f64,
    max_offset: f64,
) -> Point {
    let mut centre = predicted;
    for _ in 0..RECENTER_ITERATIONS {
        let (mut sw, mut sx, mut sy) = (0.0f64, 0.0f64, 0.0f64);
        for_each_in_circle(frame, centre, radius, |row, col, pixel| {
            if let Some((v, 0)) = pixel {
                let weight = v as f64 - sky_level;
                if weight > 0.0 {
                    sw += weight;
                    sx += weight * col as f64;
                    sy += weight * row as f64;
                }
            }
        });
        if sw <= 0.0 {
            return predicted;
        }
        let next = Point::new(sx / sw, sy / sw);
        if next.distance(&predicted) > max_offset {
            return predicted;
        }
        let moved = next.distance(&centre);
        centre = next;
        if moved < 0.01 {
            break;
        }
    }
    centre
}
