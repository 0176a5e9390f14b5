use opticam_core::calibration::{CombineMethod, SigmaClipParams};
use opticam_core::detection::{DeblendConfig, LevelSpacing};
use opticam_core::error::ReductionError;
use opticam_core::frame::CameraId;
use opticam_core::pipeline::config::{Annulus, PhotometryMethod, ReductionConfig, TransformModel};
use opticam_core::pipeline::PipelineStage;
use opticam_core::sim::SimulationConfig;

fn assert_invalid(config: &ReductionConfig, needle: &str) {
    match config.validate() {
        Err(ReductionError::InvalidConfig(msg)) => {
            assert!(msg.contains(needle), "message {msg:?} should mention {needle:?}")
        }
        other => panic!("expected InvalidConfig mentioning {needle:?}, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

#[test]
fn test_default_config_round_trips_through_toml() {
    let mut config = ReductionConfig::default();
    config.calibration.combine = CombineMethod::SigmaClippedMean(SigmaClipParams::default());
    config.registration.field_reference_camera = Some(CameraId(2));
    config.photometry.method = PhotometryMethod::Psf { fit_radius: 4.0 };

    let text = toml::to_string_pretty(&config).unwrap();
    let parsed: ReductionConfig = toml::from_str(&text).unwrap();
    assert_eq!(toml::to_string_pretty(&parsed).unwrap(), text);
    assert_eq!(parsed.registration.field_reference_camera, Some(CameraId(2)));
    assert_eq!(parsed.photometry.method, PhotometryMethod::Psf { fit_radius: 4.0 });
}

#[test]
fn test_config_round_trips_through_json() {
    let config = ReductionConfig::default();
    let json = serde_json::to_string(&config).unwrap();
    let parsed: ReductionConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(serde_json::to_string(&parsed).unwrap(), json);
}

#[test]
fn test_partial_toml_keeps_defaults() {
    let text = r#"
        workers = 4

        [registration]
        model = "Translation"

        [photometry]
        min_snr = 3.0

        [photometry.annulus]
        inner = 9.0
        outer = 14.0

        [detection]
        border_width = 6

        [detection.deblend]
        spacing = "sinh"
    "#;
    let config: ReductionConfig = toml::from_str(text).unwrap();
    let defaults = ReductionConfig::default();

    assert_eq!(config.workers, 4);
    assert_eq!(config.registration.model, TransformModel::Translation);
    assert_eq!(config.registration.min_matched_pairs, defaults.registration.min_matched_pairs);
    assert_eq!(config.photometry.min_snr, 3.0);
    assert_eq!(config.photometry.annulus, Annulus { inner: 9.0, outer: 14.0 });
    assert_eq!(config.photometry.method, defaults.photometry.method);
    assert_eq!(config.detection.border_width, 6);
    assert_eq!(config.detection.tile_size, defaults.detection.tile_size);
    let deblend = config.detection.deblend.clone().unwrap();
    assert_eq!(deblend.spacing, LevelSpacing::Sinh);
    assert_eq!(deblend.nlevels, DeblendConfig::default().nlevels);
    assert!(defaults.detection.deblend.is_none());
    assert_eq!(config.calibration.min_frames, defaults.calibration.min_frames);
    assert_eq!(config.light_curves.gap_factor, defaults.light_curves.gap_factor);
    config.validate().unwrap();
}

#[test]
fn test_empty_toml_is_the_default() {
    let config: ReductionConfig = toml::from_str("").unwrap();
    assert_eq!(
        toml::to_string(&config).unwrap(),
        toml::to_string(&ReductionConfig::default()).unwrap()
    );
}

#[test]
fn test_simulation_config_round_trips_through_toml() {
    let config = SimulationConfig::default();
    let text = toml::to_string_pretty(&config).unwrap();
    let parsed: SimulationConfig = toml::from_str(&text).unwrap();
    assert_eq!(parsed.cameras, config.cameras);
    assert_eq!(parsed.sources, config.sources);
    assert_eq!(parsed.seed, config.seed);
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[test]
fn test_default_config_is_valid() {
    ReductionConfig::default().validate().unwrap();
}

#[test]
fn test_validation_rejects_ill_defined_settings() {
    let mut c = ReductionConfig::default();
    c.calibration.min_frames = 0;
    assert_invalid(&c, "min_frames");

    let mut c = ReductionConfig::default();
    c.sensor.gain = 0.0;
    assert_invalid(&c, "gain");

    let mut c = ReductionConfig::default();
    c.registration.min_matched_pairs = 0;
    assert_invalid(&c, "min_matched_pairs");

    let mut c = ReductionConfig::default();
    c.photometry.annulus = Annulus { inner: 10.0, outer: 10.0 };
    assert_invalid(&c, "annulus outer radius");

    let mut c = ReductionConfig::default();
    c.photometry.method = PhotometryMethod::Aperture {
        radius: 9.0,
        recenter: false,
    };
    assert_invalid(&c, "overlaps");

    let mut c = ReductionConfig::default();
    c.light_curves.gap_factor = 1.0;
    assert_invalid(&c, "gap_factor");

    let mut c = ReductionConfig::default();
    c.light_curves.min_coverage = 1.5;
    assert_invalid(&c, "min_coverage");

    let mut c = ReductionConfig::default();
    c.detection.tile_size = 2;
    assert_invalid(&c, "tile_size");

    let mut c = ReductionConfig::default();
    c.detection.deblend = Some(DeblendConfig {
        contrast: 1.5,
        ..DeblendConfig::default()
    });
    assert_invalid(&c, "contrast");

    let mut c = ReductionConfig::default();
    c.registration.max_flux_ratio = Some(0.5);
    assert_invalid(&c, "max_flux_ratio");
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

#[test]
fn test_stage_and_method_labels() {
    assert_eq!(PipelineStage::Calibrating.to_string(), "Calibrating frames");
    assert_eq!(PipelineStage::CrossCamera.to_string(), "Aligning cameras");
    assert_eq!(PipelineStage::Assembling.to_string(), "Assembling light curves");
    assert_eq!(CombineMethod::Median.to_string(), "median");
    assert_eq!(CameraId(3).to_string(), "camera 3");
}
