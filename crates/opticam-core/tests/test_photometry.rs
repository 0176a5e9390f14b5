mod common;

use ndarray::Array2;

use opticam_core::frame::{mask, CalibratedFrame, FrameId, SourceId};
use opticam_core::photometry::{measure_frame, QualityFlag};
use opticam_core::pipeline::config::{PhotometryConfig, PhotometryMethod, SensorConfig};
use opticam_core::registration::{Point, Transform};

use common::{add_shot_noise, calibrated, catalog, star_field, Star};

const SIZE: usize = 64;
const SKY: f64 = 100.0;
const READ_NOISE: f64 = 5.0;

fn sensor() -> SensorConfig {
    SensorConfig {
        read_noise: READ_NOISE,
        ..SensorConfig::default()
    }
}

fn field(stars: &[Star], seed: u64) -> Array2<f32> {
    let mut data = star_field(SIZE, SIZE, SKY, stars);
    add_shot_noise(&mut data, READ_NOISE, seed);
    data
}

fn aperture(radius: f64) -> PhotometryConfig {
    PhotometryConfig {
        method: PhotometryMethod::Aperture {
            radius,
            recenter: false,
        },
        ..PhotometryConfig::default()
    }
}

fn measure_one(frame: &CalibratedFrame, at: Point, radius: f64, config: &PhotometryConfig) -> Vec<opticam_core::photometry::Measurement> {
    let cat = catalog(1, &[at], radius, 1.5);
    measure_frame(frame, &Transform::identity(), &cat, config, &sensor()).unwrap()
}

// ---------------------------------------------------------------------------
// Aperture photometry
// ---------------------------------------------------------------------------

#[test]
fn test_aperture_recovers_known_flux() {
    let star = Star::new(32.3, 31.7, 20_000.0, 1.5);
    let frame = calibrated(7, 1, field(&[star], 41));

    let found = measure_one(&frame, star.pos(), 6.0, &aperture(6.0));
    assert_eq!(found.len(), 1);
    let m = &found[0];
    assert_eq!(m.source, SourceId(1));
    assert_eq!(m.frame, FrameId(7));
    assert_eq!(m.timestamp, 7.0);
    assert_eq!(m.flag, QualityFlag::Ok);

    // Shot noise on the star plus sky and read noise over ~113 pixels.
    assert!(m.flux_err > 150.0 && m.flux_err < 260.0, "flux_err {}", m.flux_err);
    assert!(
        (m.flux - 20_000.0).abs() < 4.0 * m.flux_err,
        "flux {} +/- {} vs 20000",
        m.flux,
        m.flux_err
    );
    assert!((m.background - SKY).abs() < 2.0, "sky {}", m.background);
}

#[test]
fn test_sources_follow_the_frame_transform() {
    let catalog_pos = Point::new(30.0, 30.0);
    // The frame is offset by (+3, -2) from the reference.
    let star = Star::new(33.0, 28.0, 20_000.0, 1.5);
    let frame = calibrated(1, 1, field(&[star], 42));
    let cat = catalog(1, &[catalog_pos], 6.0, 1.5);

    let to_reference = Transform::translation(-3.0, 2.0);
    let found = measure_frame(&frame, &to_reference, &cat, &aperture(6.0), &sensor()).unwrap();
    assert_eq!(found.len(), 1);
    assert!(found[0].pos.distance(&star.pos()) < 1e-9, "measured at {:?}", found[0].pos);
    assert!((found[0].flux - 20_000.0).abs() < 4.0 * found[0].flux_err);
}

#[test]
fn test_recentering_stays_within_offset() {
    let star = Star::new(32.6, 31.4, 30_000.0, 1.5);
    let frame = calibrated(1, 1, field(&[star], 43));
    let config = PhotometryConfig {
        method: PhotometryMethod::Aperture {
            radius: 5.0,
            recenter: true,
        },
        ..PhotometryConfig::default()
    };
    let predicted = Point::new(32.0, 32.0);
    let found = measure_one(&frame, predicted, 5.0, &config);
    assert_eq!(found.len(), 1);
    let pos = found[0].pos;
    assert!(pos.distance(&star.pos()) < 0.2, "recentered to {pos:?}");
    assert!(pos.distance(&predicted) <= config.max_offset);
}

// ---------------------------------------------------------------------------
// Quality flags
// ---------------------------------------------------------------------------

#[test]
fn test_saturated_pixel_flags_measurement() {
    let star = Star::new(32.0, 32.0, 20_000.0, 1.5);
    let mut data = field(&[star], 44);
    data[[32, 32]] = 70_000.0;
    let frame = calibrated(1, 1, data);

    let found = measure_one(&frame, star.pos(), 5.0, &aperture(5.0));
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].flag, QualityFlag::Saturated);
}

#[test]
fn test_saturation_outranks_edge() {
    let star = Star::new(2.0, 32.0, 20_000.0, 1.5);
    let mut data = field(&[star], 45);
    data[[32, 2]] = 70_000.0;
    let frame = calibrated(1, 1, data);

    let found = measure_one(&frame, star.pos(), 5.0, &aperture(5.0));
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].flag, QualityFlag::Saturated);
}

#[test]
fn test_aperture_off_the_edge_is_flagged() {
    let star = Star::new(2.0, 32.0, 20_000.0, 1.5);
    let frame = calibrated(1, 1, field(&[star], 46));

    let found = measure_one(&frame, star.pos(), 5.0, &aperture(5.0));
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].flag, QualityFlag::Edge);
}

#[test]
fn test_masked_pixel_in_aperture_is_flagged_edge() {
    let star = Star::new(32.0, 32.0, 20_000.0, 1.5);
    let mut frame = calibrated(1, 1, field(&[star], 47));
    frame.mask[[33, 31]] = mask::LOW_FLAT;
    frame.data[[33, 31]] = 0.0;

    let found = measure_one(&frame, star.pos(), 5.0, &aperture(5.0));
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].flag, QualityFlag::Edge);
}

#[test]
fn test_masked_annulus_falls_back_to_frame_sky() {
    let star = Star::new(32.0, 32.0, 20_000.0, 1.5);
    let mut frame = calibrated(1, 1, field(&[star], 51));
    let annulus = PhotometryConfig::default().annulus;
    for ((r, c), m) in frame.mask.indexed_iter_mut() {
        let d = ((r as f64 - 32.0).powi(2) + (c as f64 - 32.0).powi(2)).sqrt();
        if d >= annulus.inner - 0.5 && d <= annulus.outer + 0.5 {
            *m = mask::LOW_FLAT;
        }
    }

    let found = measure_one(&frame, star.pos(), 5.0, &aperture(5.0));
    assert_eq!(found.len(), 1, "a clean aperture is still measured");
    let m = &found[0];
    assert_eq!(m.flag, QualityFlag::Edge);
    assert!((m.background - SKY).abs() < 2.0, "frame sky {}", m.background);
    assert!((m.flux - 20_000.0).abs() < 4.0 * m.flux_err, "flux {} +/- {}", m.flux, m.flux_err);
}

#[test]
fn test_fully_masked_aperture_has_no_measurement() {
    let star = Star::new(32.0, 32.0, 20_000.0, 1.5);
    let mut frame = calibrated(1, 1, field(&[star], 52));
    for ((r, c), m) in frame.mask.indexed_iter_mut() {
        if (r as f64 - 32.0).hypot(c as f64 - 32.0) <= 5.5 {
            *m = mask::NON_FINITE;
        }
    }
    assert!(measure_one(&frame, star.pos(), 5.0, &aperture(5.0)).is_empty());
}

#[test]
fn test_faint_source_is_low_snr() {
    let star = Star::new(32.0, 32.0, 30.0, 1.5);
    let frame = calibrated(1, 1, field(&[star], 48));

    let found = measure_one(&frame, star.pos(), 5.0, &aperture(5.0));
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].flag, QualityFlag::LowSnr);
    assert!(found[0].snr() < 5.0);
}

#[test]
fn test_source_off_the_frame_has_no_measurement() {
    let frame = calibrated(1, 1, field(&[], 49));
    let cat = catalog(1, &[Point::new(32.0, 32.0), Point::new(-20.0, 30.0)], 5.0, 1.5);

    let found = measure_frame(&frame, &Transform::identity(), &cat, &aperture(5.0), &sensor()).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].source, SourceId(1));
}

// ---------------------------------------------------------------------------
// PSF photometry
// ---------------------------------------------------------------------------

#[test]
fn test_psf_method_recovers_known_flux() {
    let star = Star::new(31.6, 32.4, 20_000.0, 1.5);
    let frame = calibrated(1, 1, field(&[star], 50));
    let config = PhotometryConfig {
        method: PhotometryMethod::Psf { fit_radius: 5.0 },
        ..PhotometryConfig::default()
    };

    let found = measure_one(&frame, Point::new(31.5, 32.5), 5.0, &config);
    assert_eq!(found.len(), 1);
    let m = &found[0];
    assert_eq!(m.flag, QualityFlag::Ok);
    assert!(m.pos.distance(&star.pos()) < 0.1, "fitted centre {:?}", m.pos);
    assert!(m.flux_err > 0.0);
    assert!(
        (m.flux - 20_000.0).abs() < 5.0 * m.flux_err,
        "psf flux {} +/- {}",
        m.flux,
        m.flux_err
    );
}

#[test]
fn test_psf_failure_falls_back_to_aperture_sum() {
    let star = Star::new(32.0, 32.0, 20_000.0, 1.5);
    let mut frame = calibrated(1, 1, field(&[star], 53));
    // Leave only three unmasked pixels inside the fit radius.
    for ((r, c), m) in frame.mask.indexed_iter_mut() {
        let keep = r == 32 && (31..=33).contains(&c);
        if !keep && (r as f64 - 32.0).hypot(c as f64 - 32.0) <= 5.0 {
            *m = mask::LOW_FLAT;
        }
    }
    let config = PhotometryConfig {
        method: PhotometryMethod::Psf { fit_radius: 5.0 },
        ..PhotometryConfig::default()
    };

    let found = measure_one(&frame, star.pos(), 5.0, &config);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].flag, QualityFlag::Edge);
    assert_eq!(found[0].pos, star.pos());
    assert!(found[0].flux > 0.0);
}
