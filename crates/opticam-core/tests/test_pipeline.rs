use std::sync::{Arc, Mutex};

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use opticam_core::error::{ReductionError, RegistrationFailure};
use opticam_core::frame::CameraId;
use opticam_core::photometry::QualityFlag;
use opticam_core::pipeline::config::ReductionConfig;
use opticam_core::pipeline::{
    reduce, reduce_observation, CancelToken, ObservationSet, PipelineStage, ProgressReporter, RunWarning,
};
use opticam_core::registration::Point;
use opticam_core::sim::{simulate, SimulatedCamera, SimulationConfig, SyntheticObservation, SyntheticSource};

fn scene(science_frames: usize) -> (SimulationConfig, SyntheticObservation) {
    let config = SimulationConfig {
        science_frames,
        ..SimulationConfig::default()
    };
    let sim = simulate(&config).unwrap();
    (config, sim)
}

#[derive(Default)]
struct RecordingReporter {
    stages: Mutex<Vec<(PipelineStage, Option<CameraId>)>>,
}

impl ProgressReporter for RecordingReporter {
    fn begin_stage(&self, stage: PipelineStage, camera: Option<CameraId>, _total_items: Option<usize>) {
        self.stages.lock().unwrap().push((stage, camera));
    }
}

// ---------------------------------------------------------------------------
// End to end
// ---------------------------------------------------------------------------

#[test]
fn test_single_source_scenario() {
    // 5 bias + 5 dark + 5 flat, 10 jittered science frames with one
    // 1000-count source.
    let sim_config = SimulationConfig {
        width: 64,
        height: 64,
        cameras: vec![SimulatedCamera::aligned(1, "g")],
        sources: vec![SyntheticSource::point(32.2, 31.7, 1000.0, 1.5)],
        science_frames: 10,
        read_noise: 1.0,
        sky_level: 10.0,
        jitter: 2.0,
        ..SimulationConfig::default()
    };
    let sim = simulate(&sim_config).unwrap();
    let mut config = ReductionConfig::default();
    config.registration.min_matched_pairs = 1;

    let output = reduce_observation(&sim.observation, &config).unwrap();
    assert_eq!(output.light_curves.len(), 1);
    let curve = &output.light_curves[0];
    assert_eq!(curve.camera, CameraId(1));
    assert_eq!(curve.len(), 10);
    assert_eq!(curve.count_flag(QualityFlag::Ok), 10, "flags: {:?}", curve.measurements);

    let mean = curve.fluxes().sum::<f64>() / curve.len() as f64;
    assert!(
        (mean - 1000.0).abs() < 3.0 * 1000f64.sqrt(),
        "mean flux {mean}"
    );
}

#[test]
fn test_synthetic_run_recovers_every_source() {
    let (sim_config, sim) = scene(20);
    let output = reduce_observation(&sim.observation, &ReductionConfig::default()).unwrap();

    assert_eq!(output.report.cameras_reduced, vec![CameraId(1), CameraId(2), CameraId(3)]);
    assert_eq!(output.report.science_frames, 60);
    assert_eq!(output.report.frames_registered, 60);
    assert!(output.report.is_clean(), "warnings: {:?}", output.report.warnings);

    let n_sources = sim_config.sources.len();
    for camera in [CameraId(1), CameraId(2), CameraId(3)] {
        assert_eq!(output.catalogs[&camera].len(), n_sources, "{camera} catalog");
        let curves: Vec<_> = output.curves_for(camera).collect();
        assert_eq!(curves.len(), n_sources);
        for curve in curves {
            assert_eq!(curve.len(), 20, "{camera} {} has a point per frame", curve.source);
            assert_eq!(curve.count_flag(QualityFlag::Ok), 20);
            assert!(curve.gaps.is_empty());
        }
    }
    assert_eq!(output.light_curves.len(), 3 * n_sources);
}

#[test]
fn test_fluxes_track_injected_truth() {
    let (sim_config, sim) = scene(20);
    let output = reduce_observation(&sim.observation, &ReductionConfig::default()).unwrap();
    let camera = CameraId(1);
    let catalog = &output.catalogs[&camera];

    for source in &sim_config.sources {
        let entry = catalog
            .entries
            .iter()
            .min_by(|a, b| {
                let target = Point::new(source.x, source.y);
                a.pos.distance(&target).total_cmp(&b.pos.distance(&target))
            })
            .unwrap();
        assert!(
            entry.pos.distance(&Point::new(source.x, source.y)) < 3.0,
            "catalog entry for ({}, {}) at {:?}",
            source.x,
            source.y,
            entry.pos
        );

        let curve = output.light_curve(camera, entry.id).unwrap();
        for m in &curve.measurements {
            let truth = source.flux_at(m.timestamp);
            let rel = (m.flux - truth) / truth;
            assert!(
                rel.abs() < 0.15,
                "{} frame {}: flux {} vs truth {truth}",
                entry.id,
                m.frame,
                m.flux
            );
        }
    }
}

#[test]
fn test_cameras_are_tied_to_one_field() {
    let (sim_config, sim) = scene(10);
    let output = reduce_observation(&sim.observation, &ReductionConfig::default()).unwrap();
    let field = &output.field;

    assert_eq!(field.reference_camera, Some(CameraId(1)));
    assert!(field.failures.is_empty(), "failures: {:?}", field.failures);
    assert_eq!(field.transforms.len(), 3);
    assert_eq!(field.sources.len(), sim_config.sources.len());
    for source in &field.sources {
        assert_eq!(source.members.len(), 3, "field source {} members {:?}", source.id, source.members);
        assert_eq!(source.member(CameraId(1)).map(|s| s.0), Some(source.id));
    }
}

// ---------------------------------------------------------------------------
// Failure isolation
// ---------------------------------------------------------------------------

#[test]
fn test_failed_camera_does_not_stop_the_run() {
    let (_, mut sim) = scene(8);
    sim.observation.cameras[1].bias.truncate(1);

    let output = reduce_observation(&sim.observation, &ReductionConfig::default()).unwrap();
    assert_eq!(output.report.cameras_reduced, vec![CameraId(1), CameraId(3)]);
    assert!(output.catalogs.get(&CameraId(2)).is_none());
    assert_eq!(output.curves_for(CameraId(2)).count(), 0);
    assert!(output.curves_for(CameraId(1)).count() > 0);
    assert!(output.curves_for(CameraId(3)).count() > 0);

    let failed: Vec<_> = output.report.failed_cameras().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, CameraId(2));
    assert!(failed[0].1.contains("bias"), "reason: {}", failed[0].1);
}

#[test]
fn test_bad_science_frame_is_skipped_and_reported() {
    let (_, mut sim) = scene(8);
    let bad = &mut sim.observation.cameras[0].science[3];
    let bad_id = bad.id;
    bad.data = Array2::zeros((10, 10));

    let config = ReductionConfig {
        light_curves: opticam_core::pipeline::config::LightCurveConfig {
            min_coverage: 1.0,
            ..Default::default()
        },
        ..ReductionConfig::default()
    };
    let output = reduce_observation(&sim.observation, &config).unwrap();

    assert!(output.report.warnings.iter().any(|w| matches!(
        w,
        RunWarning::CalibrationFailed { camera, frame, .. } if *camera == CameraId(1) && *frame == bad_id
    )));
    for curve in output.curves_for(CameraId(1)) {
        assert_eq!(curve.len(), 7);
        assert!(curve.measurements.iter().all(|m| m.frame != bad_id));
    }
    let short: Vec<_> = output
        .report
        .warnings
        .iter()
        .filter_map(|w| match w {
            RunWarning::InsufficientCoverage { camera, measured, frames, .. } => Some((*camera, *measured, *frames)),
            _ => None,
        })
        .collect();
    assert_eq!(short.len(), output.catalogs[&CameraId(1)].len());
    assert!(short.iter().all(|&s| s == (CameraId(1), 7, 8)));
    assert_eq!(output.curves_for(CameraId(2)).map(|c| c.len()).min(), Some(8));
}

#[test]
fn test_unregistrable_frame_leaves_a_hole_in_every_curve() {
    let (sim_config, mut sim) = scene(8);
    let blank = &mut sim.observation.cameras[0].science[5];
    let blank_id = blank.id;
    // Featureless sky: bias, dark and sky with read noise, no stars.
    let level = sim_config.bias_level + sim_config.dark_rate * sim_config.exposure + sim_config.sky_level;
    let noise = Normal::new(level, sim_config.read_noise).unwrap();
    let mut rng = StdRng::seed_from_u64(99);
    blank.data.mapv_inplace(|_| noise.sample(&mut rng) as f32);

    let output = reduce_observation(&sim.observation, &ReductionConfig::default()).unwrap();

    let failed: Vec<_> = output.report.failed_registrations().collect();
    assert_eq!(failed.len(), 1, "failures: {failed:?}");
    assert_eq!((failed[0].0, failed[0].1), (CameraId(1), blank_id));
    assert!(
        matches!(failed[0].2, RegistrationFailure::TooFewSources { .. } | RegistrationFailure::TooFewMatches { .. }),
        "reason: {:?}",
        failed[0].2
    );
    assert!(!output.registrations[&CameraId(1)].contains_key(&blank_id));
    assert_eq!(output.report.frames_registered, 3 * 8 - 1);

    let curves: Vec<_> = output.curves_for(CameraId(1)).collect();
    assert_eq!(curves.len(), sim_config.sources.len());
    for curve in curves {
        assert_eq!(curve.len(), 7, "{} length", curve.source);
        assert!(curve.measurements.iter().all(|m| m.frame != blank_id));
    }
    assert!(output.curves_for(CameraId(2)).all(|c| c.len() == 8));
}

#[test]
fn test_empty_catalog_fails_only_the_camera() {
    let (_, sim) = scene(4);
    let mut config = ReductionConfig::default();
    // Registration keeps its own threshold; only the catalog pass is starved.
    config.detection.threshold_sigma = 1.0e6;

    let output = reduce_observation(&sim.observation, &config).unwrap();
    assert!(output.report.cameras_reduced.is_empty());
    assert!(output.light_curves.is_empty());
    assert!(output.catalogs.is_empty());
    assert_eq!(output.field.reference_camera, None);

    let failed: Vec<_> = output.report.failed_cameras().collect();
    assert_eq!(failed.iter().map(|f| f.0).collect::<Vec<_>>(), vec![CameraId(1), CameraId(2), CameraId(3)]);
    for (camera, reason) in failed {
        assert!(reason.contains("no sources detected"), "{camera}: {reason}");
    }
}

// ---------------------------------------------------------------------------
// Run control
// ---------------------------------------------------------------------------

#[test]
fn test_cancelled_run_returns_cancelled() {
    let (_, sim) = scene(4);
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = reduce(
        &sim.observation,
        &ReductionConfig::default(),
        &cancel,
        Arc::new(RecordingReporter::default()),
    )
    .unwrap_err();
    assert!(matches!(err, ReductionError::Cancelled), "got {err:?}");
}

#[test]
fn test_stages_are_reported_in_order() {
    let (_, mut sim) = scene(6);
    sim.observation.cameras.truncate(1);
    let reporter = Arc::new(RecordingReporter::default());
    reduce(&sim.observation, &ReductionConfig::default(), &CancelToken::new(), reporter.clone()).unwrap();

    let stages = reporter.stages.lock().unwrap().clone();
    let camera = Some(CameraId(1));
    assert_eq!(
        stages,
        vec![
            (PipelineStage::Calibrating, camera),
            (PipelineStage::Registering, camera),
            (PipelineStage::Stacking, camera),
            (PipelineStage::Detecting, camera),
            (PipelineStage::Measuring, camera),
            (PipelineStage::CrossCamera, None),
            (PipelineStage::Assembling, None),
        ]
    );
}

#[test]
fn test_rejects_empty_and_duplicate_input() {
    let config = ReductionConfig::default();
    let err = reduce_observation(&ObservationSet::default(), &config).unwrap_err();
    assert!(matches!(err, ReductionError::EmptySequence), "got {err:?}");

    let (_, mut sim) = scene(2);
    let copy = sim.observation.cameras[0].clone();
    sim.observation.cameras.push(copy);
    let err = reduce_observation(&sim.observation, &config).unwrap_err();
    assert!(matches!(err, ReductionError::InvalidConfig(_)), "got {err:?}");
}

#[test]
fn test_invalid_config_is_rejected_before_work() {
    let (_, sim) = scene(2);
    let mut config = ReductionConfig::default();
    config.light_curves.gap_factor = 0.5;
    let err = reduce_observation(&sim.observation, &config).unwrap_err();
    assert!(matches!(err, ReductionError::InvalidConfig(_)), "got {err:?}");
}

#[test]
fn test_worker_count_does_not_change_results() {
    let (_, sim) = scene(6);
    let single = ReductionConfig {
        workers: 1,
        ..ReductionConfig::default()
    };
    let many = ReductionConfig {
        workers: 4,
        ..ReductionConfig::default()
    };
    let a = reduce_observation(&sim.observation, &single).unwrap();
    let b = reduce_observation(&sim.observation, &many).unwrap();
    assert!(!a.light_curves.is_empty());
    assert_eq!(a.light_curves, b.light_curves);
    assert_eq!(a.catalogs[&CameraId(1)].entries, b.catalogs[&CameraId(1)].entries);
}
