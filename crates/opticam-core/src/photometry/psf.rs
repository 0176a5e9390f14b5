//! Fixed-shape Gaussian PSF fitting.
//!
//! The shape comes from the source catalog; only amplitude and centre are
//! free, with the centre held within a small offset of its prediction.

use nalgebra::{Matrix3, Vector3};

use crate::consts::PSF_FIT_ITERATIONS;
use crate::detection::Shape;
use crate::frame::{mask, CalibratedFrame};
use crate::pipeline::config::SensorConfig;
use crate::registration::transform::well_conditioned;
use crate::registration::Point;

use super::aperture::{for_each_in_circle, SkyEstimate};

/// Result of a PSF fit at one position.
#[derive(Clone, Debug, PartialEq)]
pub struct PsfFit {
    pub centre: Point,
    pub amplitude: f64,
    /// Integrated flux of the fitted model.
    pub flux: f64,
    pub flux_err: f64,
    /// Pixels used in the fit.
    pub pixels: usize,
    pub outside: usize,
    pub invalid: usize,
    pub saturated: bool,
}

struct FitPixel {
    x: f64,
    y: f64,
    value: f64,
}

/// Fit `shape` to the sky-subtracted pixels within `fit_radius` of
/// `predicted`. Returns `None` when too few pixels are usable or the
/// normal equations are singular.
#[allow(clippy::too_many_arguments)]
pub fn fit_psf(
    frame: &CalibratedFrame,
    predicted: Point,
    shape: &Shape,
    sky: &SkyEstimate,
    fit_radius: f64,
    max_offset: f64,
    sensor: &SensorConfig,
    saturation: f32,
) -> Option<PsfFit> {
    let mut pixels = Vec::new();
    let (mut outside, mut invalid, mut saturated) = (0usize, 0usize, false);
    for_each_in_circle(frame, predicted, fit_radius, |row, col, pixel| match pixel {
        None => outside += 1,
        Some((v, m)) => {
            if m & mask::SATURATED != 0 || v >= saturation {
                saturated = true;
            }
            if m & !mask::SATURATED != 0 || !v.is_finite() {
                invalid += 1;
                return;
            }
            // Clipped cores would drag the amplitude down.
            if m != 0 || v >= saturation {
                return;
            }
            pixels.push(FitPixel {
                x: col as f64,
                y: row as f64,
                value: v as f64 - sky.level,
            });
        }
    });
    if pixels.len() < 4 {
        return None;
    }

    let read_var = sensor.read_noise * sensor.read_noise;
    let sky_var = (sky.variance - read_var).max(0.0);
    let noise = |model: f64| (model.max(0.0) / sensor.gain + sky_var + read_var).max(1e-12);

    // Linear amplitude at the predicted centre as a starting point.
    let (num, den) = pixels.iter().fold((0.0, 0.0), |(n, d), p| {
        let g = shape.profile(p.x - predicted.x, p.y - predicted.y);
        (n + p.value * g, d + g * g)
    });
    if den <= 0.0 {
        return None;
    }
    let mut params = [num / den, predicted.x, predicted.y];

    let mut normal = Matrix3::<f64>::zeros();
    for _ in 0..PSF_FIT_ITERATIONS {
        normal = Matrix3::zeros();
        let mut rhs = Vector3::<f64>::zeros();
        for p in &pixels {
            let (g, jac) = model_and_jacobian(shape, params, p);
            let weight = 1.0 / noise(params[0] * g);
            let residual = p.value - params[0] * g;
            normal += weight * jac * jac.transpose();
            rhs += weight * residual * jac;
        }
        if !well_conditioned(&normal) {
            break;
        }
        let Some(step) = normal.lu().solve(&rhs) else {
            break;
        };
        params[0] += step[0];
        params[1] += step[1];
        params[2] += step[2];

        // Keep the centre within reach of its prediction.
        let dx = params[1] - predicted.x;
        let dy = params[2] - predicted.y;
        let offset = (dx * dx + dy * dy).sqrt();
        if offset > max_offset {
            let scale = max_offset / offset;
            params[1] = predicted.x + dx * scale;
            params[2] = predicted.y + dy * scale;
        }
        if step[1].abs() < 1e-4 && step[2].abs() < 1e-4 && step[0].abs() < 1e-6 * params[0].abs().max(1.0) {
            break;
        }
    }
    if !params.iter().all(|v| v.is_finite()) {
        return None;
    }

    // Variance of the amplitude: first diagonal entry of the covariance.
    if !well_conditioned(&normal) {
        return None;
    }
    let covariance = normal.try_inverse()?;
    let amp_var = covariance[(0, 0)];
    let norm = std::f64::consts::TAU * shape.sigma_major * shape.sigma_minor;
    Some(PsfFit {
        centre: Point::new(params[1], params[2]),
        amplitude: params[0],
        flux: params[0] * norm,
        flux_err: amp_var.max(0.0).sqrt() * norm,
        pixels: pixels.len(),
        outside,
        invalid,
        saturated,
    })
}

/// Unit profile at `p` and the model derivatives w.r.t. (A, x0, y0).
fn model_and_jacobian(shape: &Shape, params: [f64; 3], p: &FitPixel) -> (f64, Vector3<f64>) {
    let [amp, x0, y0] = params;
    let dx = p.x - x0;
    let dy = p.y - y0;
    let (s, c) = shape.theta.sin_cos();
    let u = c * dx + s * dy;
    let v = -s * dx + c * dy;
    let a2 = shape.sigma_major * shape.sigma_major;
    let b2 = shape.sigma_minor * shape.sigma_minor;
    let g = shape.profile(dx, dy);
    // Derivatives of -Q/2 with respect to x0 and y0.
    let dq_dx = u * c / a2 - v * s / b2;
    let dq_dy = u * s / a2 + v * c / b2;
    (g, Vector3::new(g, amp * g * dq_dx, amp * g * dq_dy))
}
