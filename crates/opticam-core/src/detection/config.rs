use serde::{Deserialize, Serialize};

use crate::consts::{
    DEFAULT_BACKGROUND_TILE, DEFAULT_DETECTION_SIGMA, DEFAULT_MIN_PEAK_SIGMA, DEFAULT_MIN_PIXELS,
    DEFAULT_MIN_SEPARATION, DEFAULT_SMOOTHING_SIGMA, DEFAULT_STACK_FRAMES,
};
use crate::error::{ReductionError, Result};

use super::deblend::DeblendConfig;

/// Pixel adjacency used when grouping above-threshold pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connectivity {
    /// Horizontal and vertical neighbours only.
    Four,
    /// Diagonal neighbours too.
    #[default]
    Eight,
}

/// Configuration for point-source detection on a reference image.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Segmentation threshold above the local background, in background sigma.
    #[serde(default = "default_threshold_sigma")]
    pub threshold_sigma: f64,
    /// Minimum connected pixel count for a detection.
    #[serde(default = "default_min_pixels")]
    pub min_pixels: usize,
    /// Minimum (peak - background) / sigma for a detection.
    #[serde(default = "default_min_peak_sigma")]
    pub min_peak_sigma: f64,
    /// Detections closer than this keep only the most significant (pixels).
    #[serde(default = "default_min_separation")]
    pub min_separation: f64,
    /// Background mesh tile size (pixels).
    #[serde(default = "default_tile_size")]
    pub tile_size: usize,
    /// Gaussian blur sigma applied before thresholding; 0 disables.
    #[serde(default = "default_smoothing_sigma")]
    pub smoothing_sigma: f32,
    /// Segments whose bounding box comes within this many pixels of the
    /// image edge are discarded; 0 keeps everything.
    #[serde(default)]
    pub border_width: usize,
    #[serde(default)]
    pub connectivity: Connectivity,
    /// Split blended segments at multiple thresholds; `None` keeps each
    /// connected segment as one source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deblend: Option<DeblendConfig>,
    /// Registered frames combined into each camera's detection image.
    #[serde(default = "default_stack_frames")]
    pub stack_frames: usize,
}

fn default_threshold_sigma() -> f64 {
    DEFAULT_DETECTION_SIGMA
}
fn default_min_pixels() -> usize {
    DEFAULT_MIN_PIXELS
}
fn default_min_peak_sigma() -> f64 {
    DEFAULT_MIN_PEAK_SIGMA
}
fn default_min_separation() -> f64 {
    DEFAULT_MIN_SEPARATION
}
fn default_tile_size() -> usize {
    DEFAULT_BACKGROUND_TILE
}
fn default_smoothing_sigma() -> f32 {
    DEFAULT_SMOOTHING_SIGMA
}
fn default_stack_frames() -> usize {
    DEFAULT_STACK_FRAMES
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold_sigma: DEFAULT_DETECTION_SIGMA,
            min_pixels: DEFAULT_MIN_PIXELS,
            min_peak_sigma: DEFAULT_MIN_PEAK_SIGMA,
            min_separation: DEFAULT_MIN_SEPARATION,
            tile_size: DEFAULT_BACKGROUND_TILE,
            smoothing_sigma: DEFAULT_SMOOTHING_SIGMA,
            border_width: 0,
            connectivity: Connectivity::default(),
            deblend: None,
            stack_frames: DEFAULT_STACK_FRAMES,
        }
    }
}

impl DetectionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.threshold_sigma <= 0.0 || self.min_peak_sigma < 0.0 {
            return Err(ReductionError::InvalidConfig(
                "detection thresholds must be positive".into(),
            ));
        }
        if self.tile_size < 4 {
            return Err(ReductionError::InvalidConfig(format!(
                "detection.tile_size {} is below 4 pixels",
                self.tile_size
            )));
        }
        if self.min_pixels == 0 || self.stack_frames == 0 {
            return Err(ReductionError::InvalidConfig(
                "detection.min_pixels and detection.stack_frames must be at least 1".into(),
            ));
        }
        if let Some(deblend) = &self.deblend {
            if deblend.nlevels == 0 {
                return Err(ReductionError::InvalidConfig(
                    "detection.deblend.nlevels must be at least 1".into(),
                ));
            }
            if !(0.0..=1.0).contains(&deblend.contrast) {
                return Err(ReductionError::InvalidConfig(format!(
                    "detection.deblend.contrast {} is outside [0, 1]",
                    deblend.contrast
                )));
            }
        }
        if self.smoothing_sigma < 0.0 {
            return Err(ReductionError::InvalidConfig(
                "detection.smoothing_sigma must not be negative".into(),
            ));
        }
        Ok(())
    }
}
