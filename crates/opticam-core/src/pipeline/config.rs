use serde::{Deserialize, Serialize};

use crate::calibration::CombineMethod;
use crate::consts::*;
use crate::detection::DetectionConfig;
use crate::error::{ReductionError, Result};
use crate::frame::CameraId;

/// Run-wide reduction settings, threaded by reference into every stage.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReductionConfig {
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default)]
    pub registration: RegistrationConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub photometry: PhotometryConfig,
    #[serde(default)]
    pub light_curves: LightCurveConfig,
    /// Worker threads for per-frame stages; 0 uses every available core.
    #[serde(default)]
    pub workers: usize,
}

impl ReductionConfig {
    /// Reject settings that would make a stage ill-defined.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(ReductionError::InvalidConfig(msg));

        if self.calibration.min_frames == 0 {
            return fail("calibration.min_frames must be at least 1".into());
        }
        if self.calibration.rejection_sigma <= 0.0 {
            return fail("calibration.rejection_sigma must be positive".into());
        }
        if self.sensor.gain <= 0.0 {
            return fail("sensor.gain must be positive".into());
        }
        if self.sensor.read_noise < 0.0 {
            return fail("sensor.read_noise must not be negative".into());
        }
        let reg = &self.registration;
        if reg.min_matched_pairs == 0 {
            return fail("registration.min_matched_pairs must be at least 1".into());
        }
        if reg.residual_tolerance <= 0.0 || reg.match_radius <= 0.0 {
            return fail("registration tolerances must be positive".into());
        }
        if reg.max_iterations == 0 {
            return fail("registration.max_iterations must be at least 1".into());
        }
        if let Some(ratio) = reg.max_flux_ratio {
            if ratio < 1.0 {
                return fail(format!("registration.max_flux_ratio {ratio} must be >= 1"));
            }
        }
        self.detection.validate()?;

        let phot = &self.photometry;
        if phot.annulus.outer <= phot.annulus.inner {
            return fail(format!(
                "annulus outer radius {} must exceed inner radius {}",
                phot.annulus.outer, phot.annulus.inner
            ));
        }
        let radius = phot.method.radius();
        if radius <= 0.0 {
            return fail("photometry radius must be positive".into());
        }
        if phot.annulus.inner < radius {
            return fail(format!(
                "annulus inner radius {} overlaps the measurement radius {radius}",
                phot.annulus.inner
            ));
        }
        if self.light_curves.gap_factor <= 1.0 {
            return fail("light_curves.gap_factor must exceed 1".into());
        }
        if !(0.0..=1.0).contains(&self.light_curves.min_coverage) {
            return fail("light_curves.min_coverage must lie in [0, 1]".into());
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Pixel-wise combination statistic for master frames.
    pub combine: CombineMethod,
    /// Whole-frame rejection threshold, in robust sigmas of the stack.
    pub rejection_sigma: f64,
    /// Frames that must survive rejection for a master to be built.
    pub min_frames: usize,
    /// Normalized flat values below this are masked.
    pub flat_epsilon: f32,
    /// Calibrated values below minus this (ADU) are masked.
    pub negative_limit: f32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            combine: CombineMethod::default(),
            rejection_sigma: DEFAULT_CALIBRATION_REJECTION_SIGMA,
            min_frames: DEFAULT_MIN_CALIBRATION_FRAMES,
            flat_epsilon: DEFAULT_FLAT_EPSILON,
            negative_limit: DEFAULT_NEGATIVE_LIMIT,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Raw ADU at or above which a pixel is saturated.
    pub saturation_level: f32,
    /// Electrons per ADU.
    pub gain: f64,
    /// Read noise in ADU.
    pub read_noise: f64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            saturation_level: DEFAULT_SATURATION_LEVEL,
            gain: DEFAULT_GAIN,
            read_noise: DEFAULT_READ_NOISE,
        }
    }
}

/// Geometric model fitted between matched source lists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum TransformModel {
    /// Pure shift.
    Translation,
    /// Full six-parameter affine. Falls back to a shift when fewer than
    /// three non-collinear pairs are available.
    #[default]
    Affine,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Index (within the camera's science sequence) of the reference frame.
    /// `None` picks the first frame that registers against itself.
    pub reference_frame: Option<usize>,
    pub model: TransformModel,
    /// Matched pairs a frame needs to register, and sources a frame needs to
    /// serve as reference. Fields with fewer stars than this (a lone target)
    /// must lower it; with one pair the fit is a pure translation.
    pub min_matched_pairs: usize,
    /// Maximum accepted residual RMS after the final fit (pixels).
    pub residual_tolerance: f64,
    /// Nearest-neighbour search radius after the coarse offset (pixels).
    pub match_radius: f64,
    /// Candidates closer than this in distance are tie-broken on flux ratio.
    pub tie_tolerance: f64,
    /// Reject pairs whose flux ratio exceeds this (either way). Never applied
    /// across cameras, whose filters differ.
    pub max_flux_ratio: Option<f64>,
    /// Brightest sources per frame used for matching.
    pub max_sources: usize,
    /// Detection threshold for registration sources (background sigma).
    pub detection_sigma: f64,
    /// Pairs with residual above `outlier_sigma * rms` are discarded and the
    /// transform refit.
    pub outlier_sigma: f64,
    /// Residuals below this are always kept (pixels).
    pub outlier_floor: f64,
    pub max_iterations: usize,
    /// Estimate a translation by phase correlation before matching.
    pub coarse_offset: bool,
    /// Camera whose reference frame defines the common field. Defaults to
    /// the lowest camera id that reduced successfully.
    pub field_reference_camera: Option<CameraId>,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            reference_frame: None,
            model: TransformModel::default(),
            min_matched_pairs: DEFAULT_MIN_MATCHED_PAIRS,
            residual_tolerance: DEFAULT_RESIDUAL_TOLERANCE,
            match_radius: DEFAULT_MATCH_RADIUS,
            tie_tolerance: DEFAULT_TIE_TOLERANCE,
            max_flux_ratio: None,
            max_sources: DEFAULT_REGISTRATION_MAX_SOURCES,
            detection_sigma: DEFAULT_REGISTRATION_DETECTION_SIGMA,
            outlier_sigma: DEFAULT_OUTLIER_SIGMA,
            outlier_floor: DEFAULT_OUTLIER_FLOOR,
            max_iterations: DEFAULT_MAX_FIT_ITERATIONS,
            coarse_offset: true,
            field_reference_camera: None,
        }
    }
}

/// How flux is extracted at each catalog position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PhotometryMethod {
    /// Sum within a circular aperture minus the annulus median per pixel.
    Aperture {
        radius: f64,
        /// Re-centroid within `max_offset` of the predicted position instead
        /// of measuring exactly at it.
        recenter: bool,
    },
    /// Fit the catalog's Gaussian shape model within `fit_radius`.
    Psf { fit_radius: f64 },
}

impl PhotometryMethod {
    /// Radius of the pixel region that contributes flux.
    pub fn radius(&self) -> f64 {
        match self {
            Self::Aperture { radius, .. } => *radius,
            Self::Psf { fit_radius } => *fit_radius,
        }
    }
}

impl Default for PhotometryMethod {
    fn default() -> Self {
        Self::Aperture {
            radius: DEFAULT_APERTURE_RADIUS,
            recenter: false,
        }
    }
}

/// Background annulus radii (pixels).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Annulus {
    pub inner: f64,
    pub outer: f64,
}

impl Default for Annulus {
    fn default() -> Self {
        Self {
            inner: DEFAULT_ANNULUS_INNER,
            outer: DEFAULT_ANNULUS_OUTER,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PhotometryConfig {
    pub method: PhotometryMethod,
    pub annulus: Annulus,
    /// Largest centroid shift allowed when recentering or PSF fitting (pixels).
    pub max_offset: f64,
    /// flux / uncertainty below this is flagged `LowSnr`.
    pub min_snr: f64,
}

impl Default for PhotometryConfig {
    fn default() -> Self {
        Self {
            method: PhotometryMethod::default(),
            annulus: Annulus::default(),
            max_offset: DEFAULT_MAX_CENTROID_OFFSET,
            min_snr: DEFAULT_MIN_SNR,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LightCurveConfig {
    /// Gaps longer than this multiple of the median cadence are annotated.
    pub gap_factor: f64,
    /// Sources measured in fewer than this fraction of a camera's science
    /// frames are listed in the run report.
    pub min_coverage: f64,
}

impl Default for LightCurveConfig {
    fn default() -> Self {
        Self {
            gap_factor: DEFAULT_GAP_FACTOR,
            min_coverage: DEFAULT_MIN_COVERAGE,
        }
    }
}
