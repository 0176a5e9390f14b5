mod common;

use approx::assert_relative_eq;

use opticam_core::differential::differential;
use opticam_core::error::ReductionError;
use opticam_core::frame::{FrameId, SourceId};
use opticam_core::lightcurve::{assemble, LightCurve};
use opticam_core::photometry::{Measurement, QualityFlag};
use opticam_core::pipeline::config::LightCurveConfig;

use common::measurement;

fn curve(camera: u8, source: u32, points: &[(u64, f64)]) -> LightCurve {
    let measurements: Vec<Measurement> = points
        .iter()
        .map(|&(frame, flux)| measurement(camera, source, frame, frame as f64 * 2.0, flux))
        .collect();
    assemble(measurements, &LightCurveConfig::default())
        .curves
        .into_iter()
        .next()
        .unwrap()
}

// ---------------------------------------------------------------------------
// Ratios
// ---------------------------------------------------------------------------

#[test]
fn test_ratio_against_summed_comparisons() {
    let target = curve(1, 1, &[(0, 500.0), (1, 600.0), (2, 550.0)]);
    let comp_a = curve(1, 2, &[(0, 1000.0), (1, 1000.0), (2, 1000.0)]);
    let comp_b = curve(1, 3, &[(0, 1500.0), (1, 1500.0), (2, 1500.0)]);

    let rel = differential(&target, &[&comp_a, &comp_b]).unwrap();
    assert_eq!(rel.target, SourceId(1));
    assert_eq!(rel.comparisons, vec![SourceId(2), SourceId(3)]);
    let ratios: Vec<f64> = rel.points.iter().map(|p| p.ratio).collect();
    assert_eq!(ratios, vec![0.2, 0.24, 0.22]);
}

#[test]
fn test_ratio_errors_add_in_quadrature() {
    let mut target = curve(1, 1, &[(0, 400.0)]);
    target.measurements[0].flux_err = 20.0;
    let mut comp = curve(1, 2, &[(0, 800.0)]);
    comp.measurements[0].flux_err = 30.0;

    let rel = differential(&target, &[&comp]).unwrap();
    let p = &rel.points[0];
    let expected = 0.5 * ((20.0f64 / 400.0).powi(2) + (30.0f64 / 800.0).powi(2)).sqrt();
    assert_relative_eq!(p.ratio_err, expected, max_relative = 1e-12);
}

#[test]
fn test_only_shared_frames_contribute() {
    let target = curve(1, 1, &[(0, 100.0), (1, 100.0), (2, 100.0), (3, 100.0)]);
    let comp_a = curve(1, 2, &[(0, 200.0), (1, 200.0), (3, 200.0)]);
    let comp_b = curve(1, 3, &[(1, 200.0), (2, 200.0), (3, 200.0)]);

    let rel = differential(&target, &[&comp_a, &comp_b]).unwrap();
    let frames: Vec<FrameId> = rel.points.iter().map(|p| p.frame).collect();
    assert_eq!(frames, vec![FrameId(1), FrameId(3)]);
    assert!(rel.points.iter().all(|p| p.ratio == 0.25));
}

#[test]
fn test_worst_flag_is_carried() {
    let mut target = curve(1, 1, &[(0, 100.0), (1, 100.0)]);
    target.measurements[0].flag = QualityFlag::LowSnr;
    let mut comp = curve(1, 2, &[(0, 200.0), (1, 200.0)]);
    comp.measurements[0].flag = QualityFlag::Saturated;

    let rel = differential(&target, &[&comp]).unwrap();
    assert_eq!(rel.points[0].flag, QualityFlag::Saturated);
    assert_eq!(rel.points[1].flag, QualityFlag::Ok);
}

#[test]
fn test_non_positive_comparison_flux_is_skipped() {
    let target = curve(1, 1, &[(0, 100.0), (1, 100.0)]);
    let comp = curve(1, 2, &[(0, -5.0), (1, 200.0)]);

    let rel = differential(&target, &[&comp]).unwrap();
    assert_eq!(rel.points.len(), 1);
    assert_eq!(rel.points[0].frame, FrameId(1));
}

// ---------------------------------------------------------------------------
// Invalid requests
// ---------------------------------------------------------------------------

#[test]
fn test_requires_a_comparison() {
    let target = curve(1, 1, &[(0, 100.0)]);
    let err = differential(&target, &[]).unwrap_err();
    assert!(matches!(err, ReductionError::InvalidConfig(_)), "got {err:?}");
}

#[test]
fn test_rejects_comparisons_from_another_camera() {
    let target = curve(1, 1, &[(0, 100.0)]);
    let other = curve(2, 1, &[(0, 100.0)]);
    let err = differential(&target, &[&other]).unwrap_err();
    assert!(matches!(err, ReductionError::InvalidConfig(_)), "got {err:?}");
}
