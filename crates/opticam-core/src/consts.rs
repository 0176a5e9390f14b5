/// Minimum pixel count (h*w) to use row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Small epsilon to avoid division by zero in floating-point comparisons.
pub const EPSILON: f64 = 1e-10;

/// Scale factor turning a median absolute deviation into a Gaussian sigma.
pub const MAD_TO_SIGMA: f64 = 1.4826;

/// Default sigma threshold for rejecting whole calibration frames whose
/// global mean or spread departs from the stack median.
pub const DEFAULT_CALIBRATION_REJECTION_SIGMA: f64 = 5.0;

/// Relative floor on the calibration rejection band (fraction of the stack
/// median level), so a perfectly uniform stack does not reject float noise.
pub const CALIBRATION_REJECTION_RELATIVE_FLOOR: f64 = 0.05;

/// Default minimum number of frames that must survive rejection.
pub const DEFAULT_MIN_CALIBRATION_FRAMES: usize = 3;

/// Flat-field values below this (after normalization to mean 1.0) are masked.
pub const DEFAULT_FLAT_EPSILON: f32 = 0.05;

/// Calibrated values below minus this limit (ADU) are masked as invalid.
pub const DEFAULT_NEGATIVE_LIMIT: f32 = 500.0;

/// Default sigma-clip threshold used when combining calibration stacks.
pub const DEFAULT_CLIP_SIGMA: f32 = 3.0;

/// Default number of sigma-clip iterations.
pub const DEFAULT_CLIP_ITERATIONS: usize = 3;

/// 16-bit sensor full well in ADU.
pub const DEFAULT_SATURATION_LEVEL: f32 = 65_535.0;

/// Default detector gain (e-/ADU).
pub const DEFAULT_GAIN: f64 = 1.0;

/// Default read noise (ADU).
pub const DEFAULT_READ_NOISE: f64 = 0.0;

/// Default minimum matched pairs for a frame registration to be accepted.
pub const DEFAULT_MIN_MATCHED_PAIRS: usize = 4;

/// Default RMS residual tolerance for an accepted registration (pixels).
pub const DEFAULT_RESIDUAL_TOLERANCE: f64 = 1.0;

/// Default nearest-neighbour match radius after the coarse offset (pixels).
pub const DEFAULT_MATCH_RADIUS: f64 = 5.0;

/// Two candidates whose distances differ by less than this are tie-broken
/// on flux ratio (pixels).
pub const DEFAULT_TIE_TOLERANCE: f64 = 0.5;

/// Number of brightest sources used for registration.
pub const DEFAULT_REGISTRATION_MAX_SOURCES: usize = 50;

/// Detection threshold for registration sources (background sigma).
pub const DEFAULT_REGISTRATION_DETECTION_SIGMA: f64 = 8.0;

/// Residual rejection threshold during iterative fitting (RMS multiples).
pub const DEFAULT_OUTLIER_SIGMA: f64 = 3.0;

/// Residuals below this are never rejected as outliers (pixels).
pub const DEFAULT_OUTLIER_FLOOR: f64 = 0.5;

/// Default upper bound on fit/reject/refit iterations.
pub const DEFAULT_MAX_FIT_ITERATIONS: usize = 10;

/// Default detection threshold above background (background sigma).
pub const DEFAULT_DETECTION_SIGMA: f64 = 5.0;

/// Default minimum connected pixel count for a detection.
pub const DEFAULT_MIN_PIXELS: usize = 5;

/// Default minimum peak significance (background sigma) for a detection.
pub const DEFAULT_MIN_PEAK_SIGMA: f64 = 5.0;

/// Default minimum centroid separation between two kept detections (pixels).
pub const DEFAULT_MIN_SEPARATION: f64 = 5.0;

/// Default background mesh tile size (pixels).
pub const DEFAULT_BACKGROUND_TILE: usize = 64;

/// Default Gaussian smoothing applied before segmentation (pixels).
pub const DEFAULT_SMOOTHING_SIGMA: f32 = 1.0;

/// Default number of registered frames combined into the detection reference.
pub const DEFAULT_STACK_FRAMES: usize = 5;

/// Default aperture radius (pixels).
pub const DEFAULT_APERTURE_RADIUS: f64 = 5.0;

/// Default background annulus inner radius (pixels).
pub const DEFAULT_ANNULUS_INNER: f64 = 8.0;

/// Default background annulus outer radius (pixels).
pub const DEFAULT_ANNULUS_OUTER: f64 = 12.0;

/// Default PSF fitting radius (pixels).
pub const DEFAULT_PSF_FIT_RADIUS: f64 = 5.0;

/// Default maximum centroid shift allowed while fitting or recentering (pixels).
pub const DEFAULT_MAX_CENTROID_OFFSET: f64 = 1.5;

/// Gauss-Newton iterations used by the PSF fit.
pub const PSF_FIT_ITERATIONS: usize = 12;

/// Measurements below this flux / uncertainty ratio are flagged LOW_SNR.
pub const DEFAULT_MIN_SNR: f64 = 5.0;

/// Minimum annulus pixel count for a usable local background.
pub const MIN_ANNULUS_PIXELS: usize = 10;

/// Gaps longer than this multiple of the median cadence are annotated.
pub const DEFAULT_GAP_FACTOR: f64 = 3.0;

/// Sources measured in fewer than this fraction of frames are reported.
pub const DEFAULT_MIN_COVERAGE: f64 = 0.5;

/// Determinants below this magnitude mark a transform as degenerate.
pub const DEGENERATE_DETERMINANT: f64 = 1e-8;
