use std::fmt;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Identifier of one of the instrument's co-aligned cameras.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CameraId(pub u8);

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "camera {}", self.0)
    }
}

/// Identifier of a single exposure, unique within a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrameId(pub u64);

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Stable source identifier assigned once at detection time, per camera.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceId(pub u32);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

/// What a raw exposure was taken for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameKind {
    Bias,
    Dark,
    Flat,
    Science,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bias => write!(f, "bias"),
            Self::Dark => write!(f, "dark"),
            Self::Flat => write!(f, "flat"),
            Self::Science => write!(f, "science"),
        }
    }
}

/// A decoded exposure as handed over by the ingestion layer.
///
/// Pixel values are in ADU, row-major, shape = (height, width).
#[derive(Clone, Debug)]
pub struct RawFrame {
    pub id: FrameId,
    pub camera: CameraId,
    pub filter: String,
    pub kind: FrameKind,
    /// Capture time in seconds from an arbitrary run epoch.
    pub timestamp: f64,
    /// Exposure duration in seconds.
    pub exposure: f64,
    pub data: Array2<f32>,
}

impl RawFrame {
    pub fn new(
        id: FrameId,
        camera: CameraId,
        kind: FrameKind,
        timestamp: f64,
        exposure: f64,
        data: Array2<f32>,
    ) -> Self {
        Self {
            id,
            camera,
            filter: String::new(),
            kind,
            timestamp,
            exposure,
            data,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }
}

/// Per-pixel mask bits carried by a [`CalibratedFrame`]. Zero means valid.
pub mod mask {
    /// Flat-field response below the configured epsilon.
    pub const LOW_FLAT: u8 = 1 << 0;
    /// Bias/dark subtraction drove the value far negative.
    pub const NEGATIVE: u8 = 1 << 1;
    /// Raw value at or above the sensor saturation level.
    pub const SATURATED: u8 = 1 << 2;
    /// NaN or infinite input.
    pub const NON_FINITE: u8 = 1 << 3;
}

/// A science frame after bias, dark and flat correction.
#[derive(Clone, Debug)]
pub struct CalibratedFrame {
    pub id: FrameId,
    pub camera: CameraId,
    pub timestamp: f64,
    pub exposure: f64,
    pub data: Array2<f32>,
    /// Bitwise OR of [`mask`] flags per pixel.
    pub mask: Array2<u8>,
}

impl CalibratedFrame {
    /// Wrap an already-clean array with an all-valid mask.
    pub fn from_data(id: FrameId, camera: CameraId, timestamp: f64, data: Array2<f32>) -> Self {
        let mask = Array2::zeros(data.dim());
        Self {
            id,
            camera,
            timestamp,
            exposure: 0.0,
            data,
            mask,
        }
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    pub fn is_valid(&self, row: usize, col: usize) -> bool {
        self.mask[[row, col]] == 0
    }

    pub fn valid_fraction(&self) -> f64 {
        let n = self.mask.len();
        if n == 0 {
            return 0.0;
        }
        self.mask.iter().filter(|&&m| m == 0).count() as f64 / n as f64
    }
}
