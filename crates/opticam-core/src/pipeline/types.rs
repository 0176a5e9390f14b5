use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{ReductionError, Result};
use crate::frame::{CameraId, RawFrame};

/// Pipeline processing stage, used for progress reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineStage {
    Calibrating,
    Registering,
    Stacking,
    Detecting,
    Measuring,
    CrossCamera,
    Assembling,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Calibrating => write!(f, "Calibrating frames"),
            Self::Registering => write!(f, "Registering frames"),
            Self::Stacking => write!(f, "Stacking reference"),
            Self::Detecting => write!(f, "Detecting sources"),
            Self::Measuring => write!(f, "Measuring photometry"),
            Self::CrossCamera => write!(f, "Aligning cameras"),
            Self::Assembling => write!(f, "Assembling light curves"),
        }
    }
}

/// Thread-safe progress reporting for the pipeline.
///
/// Implementors can use this to drive progress bars, logging, or any other
/// UI feedback. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    /// A new stage has started for `camera` (`None` for run-wide stages).
    /// `total_items` is the number of work items, if known.
    fn begin_stage(&self, _stage: PipelineStage, _camera: Option<CameraId>, _total_items: Option<usize>) {}

    /// Work items completed so far within the current stage.
    fn advance(&self, _items_done: usize) {}

    /// The current stage is finished.
    fn finish_stage(&self) {}
}

/// No-op progress reporter, used when `reduce_observation` delegates.
pub(super) struct NoOpReporter;
impl ProgressReporter for NoOpReporter {}

/// Run-wide abort flag, checked at each frame's entry point.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// `Err(Cancelled)` once [`cancel`](Self::cancel) has been called.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ReductionError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Every raw frame of one camera, already decoded into memory.
#[derive(Clone, Debug)]
pub struct CameraFrames {
    pub camera: CameraId,
    pub bias: Vec<RawFrame>,
    pub darks: Vec<RawFrame>,
    pub flats: Vec<RawFrame>,
    /// Science exposures in acquisition order.
    pub science: Vec<RawFrame>,
}

impl CameraFrames {
    pub fn new(camera: CameraId) -> Self {
        Self {
            camera,
            bias: Vec::new(),
            darks: Vec::new(),
            flats: Vec::new(),
            science: Vec::new(),
        }
    }
}

/// Input to a reduction run: one entry per camera.
#[derive(Clone, Debug, Default)]
pub struct ObservationSet {
    pub cameras: Vec<CameraFrames>,
}

impl ObservationSet {
    pub fn science_frame_count(&self) -> usize {
        self.cameras.iter().map(|c| c.science.len()).sum()
    }
}
