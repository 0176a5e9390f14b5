use ndarray::Array2;
use serde::Serialize;
use tracing::{debug, warn};

use crate::detection::{detect_sources, Detection, DetectionConfig, SourceCatalog};
use crate::error::RegistrationFailure;
use crate::frame::CalibratedFrame;
use crate::pipeline::config::{RegistrationConfig, TransformModel};

use super::matching::{match_sources, MatchParams};
use super::phase_correlation::estimate_shift;
use super::transform::{Point, Transform};

/// Accepted alignment of one frame (or camera) onto its reference.
#[derive(Clone, Debug, Serialize)]
pub struct Registration {
    /// Maps this frame's pixel coordinates into reference coordinates.
    pub transform: Transform,
    /// Pairs that survived outlier rejection.
    pub matched: usize,
    /// Residual RMS of the surviving pairs (pixels).
    pub rms: f64,
    /// Phase-correlation displacement used to seed matching.
    pub coarse_shift: Point,
}

impl Registration {
    pub fn identity() -> Self {
        Self {
            transform: Transform::identity(),
            matched: 0,
            rms: 0.0,
            coarse_shift: Point::default(),
        }
    }
}

/// Bright, compact sources in a calibrated frame for registration.
pub fn registration_sources(
    frame: &CalibratedFrame,
    detection: &DetectionConfig,
    config: &RegistrationConfig,
) -> Vec<Detection> {
    let params = DetectionConfig {
        threshold_sigma: config.detection_sigma,
        min_peak_sigma: config.detection_sigma.max(detection.min_peak_sigma),
        ..detection.clone()
    };
    let mut sources = detect_sources(&frame.data, Some(&frame.mask), &params);
    sources.truncate(config.max_sources);
    sources
}

/// Pick the reference index: the configured one if it exists, otherwise
/// the first frame with enough sources to anchor matching.
pub fn select_reference(sources: &[Vec<Detection>], config: &RegistrationConfig) -> Option<usize> {
    if let Some(i) = config.reference_frame {
        if i < sources.len() {
            return Some(i);
        }
        warn!(
            index = i,
            frames = sources.len(),
            "configured reference frame out of range, picking automatically"
        );
    }
    sources
        .iter()
        .position(|s| s.len() >= config.min_matched_pairs)
}

/// Coarse displacement of `target` relative to `reference`, or zero when
/// disabled or the images differ in size.
pub fn coarse_shift(
    reference: &Array2<f32>,
    target: &Array2<f32>,
    config: &RegistrationConfig,
) -> Point {
    if !config.coarse_offset || reference.dim() != target.dim() {
        return Point::default();
    }
    estimate_shift(reference, target).unwrap_or_default()
}

/// Fit the transform mapping `target` source positions onto `reference`.
///
/// Matching is seeded with `shift` (and with no shift, keeping whichever
/// matches more pairs), refined once with the first fit, then outliers are
/// rejected iteratively. Never drops below `min_matched_pairs`.
pub fn register_sources(
    reference: &[Detection],
    target: &[Detection],
    shift: Point,
    config: &RegistrationConfig,
    max_flux_ratio: Option<f64>,
) -> std::result::Result<Registration, RegistrationFailure> {
    let required = config.min_matched_pairs.max(1);
    if target.len() < required {
        return Err(RegistrationFailure::TooFewSources {
            found: target.len(),
            required,
        });
    }

    let params = MatchParams {
        radius: config.match_radius,
        tie_tolerance: config.tie_tolerance,
        max_flux_ratio,
    };
    let seeded = match_sources(reference, target, shift, &params);
    let unseeded = if shift == Point::default() {
        Vec::new()
    } else {
        match_sources(reference, target, Point::default(), &params)
    };
    let (pairs, used_shift) = if unseeded.len() > seeded.len() {
        (unseeded, Point::default())
    } else {
        (seeded, shift)
    };
    if pairs.len() < required {
        return Err(RegistrationFailure::TooFewMatches {
            matched: pairs.len(),
            required,
        });
    }

    let points: Vec<(Point, Point)> = pairs
        .iter()
        .map(|p| (target[p.target].pos, reference[p.reference].pos))
        .collect();
    let first = fit_model(&points, config.model).ok_or(RegistrationFailure::Degenerate)?;

    // Re-match with the first fit applied so distortions beyond a pure
    // shift still find their partners.
    let moved: Vec<Detection> = target
        .iter()
        .map(|d| Detection {
            pos: first.apply(d.pos),
            ..d.clone()
        })
        .collect();
    let rematched = match_sources(reference, &moved, Point::default(), &params);
    let points: Vec<(Point, Point)> = if rematched.len() >= points.len() {
        rematched
            .iter()
            .map(|p| (target[p.target].pos, reference[p.reference].pos))
            .collect()
    } else {
        points
    };

    let (transform, rms, matched) = fit_with_rejection(points, config, required)?;
    if rms > config.residual_tolerance {
        return Err(RegistrationFailure::ResidualTooLarge {
            rms,
            tolerance: config.residual_tolerance,
        });
    }
    debug!(matched, rms, "registration accepted");
    Ok(Registration {
        transform,
        matched,
        rms,
        coarse_shift: used_shift,
    })
}

/// Align a camera's catalog onto the field reference camera's catalog.
///
/// Flux ratios are not used since the cameras observe through different
/// filters.
pub fn register_catalogs(
    field_reference: &SourceCatalog,
    catalog: &SourceCatalog,
    shift: Point,
    config: &RegistrationConfig,
) -> std::result::Result<Registration, RegistrationFailure> {
    let as_detections = |c: &SourceCatalog| -> Vec<Detection> {
        c.entries
            .iter()
            .take(config.max_sources)
            .map(|e| Detection {
                pos: e.pos,
                flux: e.flux,
                peak: 0.0,
                peak_sigma: e.peak_sigma,
                npix: 0,
                shape: e.shape,
            })
            .collect()
    };
    register_sources(
        &as_detections(field_reference),
        &as_detections(catalog),
        shift,
        config,
        None,
    )
}

fn fit_model(points: &[(Point, Point)], model: TransformModel) -> Option<Transform> {
    match model {
        TransformModel::Translation => Transform::fit_translation(points),
        TransformModel::Affine => {
            Transform::fit_affine(points).or_else(|| Transform::fit_translation(points))
        }
    }
}

fn residuals(transform: &Transform, points: &[(Point, Point)]) -> Vec<f64> {
    points
        .iter()
        .map(|(s, d)| transform.apply(*s).distance(d))
        .collect()
}

fn rms(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    (values.iter().map(|r| r * r).sum::<f64>() / values.len() as f64).sqrt()
}

/// Drop the worst pair while it stands out from a fit made without it.
///
/// Each pass refits without the largest-residual pair and rejects that pair
/// if its residual exceeds `max(outlier_sigma * rms_of_rest, outlier_floor)`.
fn fit_with_rejection(
    mut points: Vec<(Point, Point)>,
    config: &RegistrationConfig,
    required: usize,
) -> std::result::Result<(Transform, f64, usize), RegistrationFailure> {
    let mut transform = fit_model(&points, config.model).ok_or(RegistrationFailure::Degenerate)?;
    for _ in 0..config.max_iterations {
        if points.len() <= required {
            break;
        }
        let res = residuals(&transform, &points);
        let Some(worst) = res
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
        else {
            break;
        };
        let mut rest = points.clone();
        let candidate = rest.remove(worst);
        let Some(refit) = fit_model(&rest, config.model) else {
            break;
        };
        let candidate_residual = refit.apply(candidate.0).distance(&candidate.1);
        let limit = (config.outlier_sigma * rms(&residuals(&refit, &rest))).max(config.outlier_floor);
        if candidate_residual <= limit {
            break;
        }
        debug!(residual = candidate_residual, limit, "registration pair rejected");
        transform = refit;
        points = rest;
    }
    let final_rms = rms(&residuals(&transform, &points));
    Ok((transform, final_rms, points.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Shape;

    fn det(x: f64, y: f64, flux: f64) -> Detection {
        Detection {
            pos: Point::new(x, y),
            flux,
            peak: flux / 10.0,
            peak_sigma: 50.0,
            npix: 20,
            shape: Shape::circular(1.5),
        }
    }

    fn field() -> Vec<Detection> {
        [
            (12.0, 15.0, 900.0),
            (80.0, 22.0, 700.0),
            (45.0, 60.0, 1500.0),
            (20.0, 90.0, 400.0),
            (95.0, 85.0, 1100.0),
            (60.0, 35.0, 650.0),
        ]
        .iter()
        .map(|&(x, y, f)| det(x, y, f))
        .collect()
    }

    #[test]
    fn test_recovers_shift_and_rotation() {
        let reference = field();
        // Frame -> reference truth; the frame sees the inverse.
        let truth = Transform::similarity(1.0, 0.01, -3.0, 2.0).unwrap();
        let to_frame = truth.inverse().unwrap();
        let target: Vec<Detection> = reference
            .iter()
            .map(|d| Detection {
                pos: to_frame.apply(d.pos),
                ..d.clone()
            })
            .collect();
        let config = RegistrationConfig::default();
        let reg = register_sources(&reference, &target, Point::new(3.0, -2.0), &config, None).unwrap();
        assert_eq!(reg.matched, 6);
        assert!(reg.rms < 1e-6);
        let pts: Vec<Point> = target.iter().map(|d| d.pos).collect();
        let diff = reg.transform.inverse().unwrap().compose(&truth).unwrap();
        assert!(diff.max_displacement(&pts) < 1e-6);
    }

    #[test]
    fn test_outlier_rejected() {
        let reference = field();
        let mut target: Vec<Detection> = reference
            .iter()
            .map(|d| det(d.pos.x + 1.0, d.pos.y, d.flux))
            .collect();
        // One source moved 3 px, still inside the match radius.
        target[2].pos.y += 3.0;
        let config = RegistrationConfig {
            coarse_offset: false,
            ..RegistrationConfig::default()
        };
        let reg = register_sources(&reference, &target, Point::new(1.0, 0.0), &config, None).unwrap();
        assert_eq!(reg.matched, 5);
        assert!(reg.rms < 1e-6);
    }

    #[test]
    fn test_too_few_sources() {
        let reference = field();
        let target = vec![det(12.0, 15.0, 900.0)];
        let err = register_sources(
            &reference,
            &target,
            Point::default(),
            &RegistrationConfig::default(),
            None,
        )
        .unwrap_err();
        assert_eq!(
            err,
            RegistrationFailure::TooFewSources {
                found: 1,
                required: 4
            }
        );
    }

    #[test]
    fn test_no_overlap_is_too_few_matches() {
        let reference = field();
        let target: Vec<Detection> = reference
            .iter()
            .map(|d| det(d.pos.x + 500.0, d.pos.y, d.flux))
            .collect();
        let err = register_sources(
            &reference,
            &target,
            Point::default(),
            &RegistrationConfig::default(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, RegistrationFailure::TooFewMatches { matched: 0, .. }));
    }

    #[test]
    fn test_select_reference_defaults_to_first_usable() {
        let config = RegistrationConfig::default();
        let sources = vec![vec![det(1.0, 1.0, 1.0)], field(), field()];
        assert_eq!(select_reference(&sources, &config), Some(1));
        let pinned = RegistrationConfig {
            reference_frame: Some(2),
            ..config
        };
        assert_eq!(select_reference(&sources, &pinned), Some(2));
    }
}
