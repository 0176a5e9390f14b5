use thiserror::Error;

use crate::frame::{CameraId, FrameId, FrameKind};

#[derive(Error, Debug)]
pub enum ReductionError {
    #[error("{camera}: {usable} usable {kind} frame(s), at least {required} required")]
    InsufficientCalibrationFrames {
        camera: CameraId,
        kind: FrameKind,
        usable: usize,
        required: usize,
    },

    #[error("frame {frame} cannot be calibrated: {detail}")]
    CalibrationMismatch { frame: FrameId, detail: String },

    #[error("registration failed: {0}")]
    RegistrationFailed(#[from] RegistrationFailure),

    #[error("{camera}: no sources detected in the reference image")]
    DetectionEmpty { camera: CameraId },

    #[error("Degenerate transform (determinant {determinant:e})")]
    DegenerateTransform { determinant: f64 },

    #[error("Array size mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Empty frame sequence")]
    EmptySequence,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Reduction cancelled")]
    Cancelled,

    #[error("Worker pool error: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// Why a frame (or a camera's field alignment) could not be registered.
#[derive(Error, Debug, Clone, PartialEq, serde::Serialize)]
pub enum RegistrationFailure {
    #[error("only {found} usable source(s) in frame, {required} required")]
    TooFewSources { found: usize, required: usize },

    #[error("only {matched} matched source pair(s), {required} required")]
    TooFewMatches { matched: usize, required: usize },

    #[error("residual RMS {rms:.3} px exceeds tolerance {tolerance:.3} px")]
    ResidualTooLarge { rms: f64, tolerance: f64 },

    #[error("fitted transform is degenerate")]
    Degenerate,
}

pub type Result<T> = std::result::Result<T, ReductionError>;
