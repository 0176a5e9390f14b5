use serde::Serialize;

use crate::calibration::RejectedFrame;
use crate::error::RegistrationFailure;
use crate::frame::{CameraId, FrameId, SourceId};
use crate::lightcurve::DroppedMeasurement;

/// A non-fatal problem recorded during a run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum RunWarning {
    /// Calibration frame left out of its master.
    RejectedCalibrationFrame(RejectedFrame),
    /// Science frame that could not be calibrated.
    CalibrationFailed {
        camera: CameraId,
        frame: FrameId,
        reason: String,
    },
    /// Science frame skipped for photometry.
    RegistrationFailed {
        camera: CameraId,
        frame: FrameId,
        reason: RegistrationFailure,
    },
    PhotometryFailed {
        camera: CameraId,
        frame: FrameId,
        reason: String,
    },
    /// The camera produced no catalog or light curves.
    CameraFailed { camera: CameraId, reason: String },
    /// The camera's catalog could not be tied to the common field.
    FieldRegistrationFailed {
        camera: CameraId,
        reason: RegistrationFailure,
    },
    MeasurementDropped(DroppedMeasurement),
    /// Source measured in too few of its camera's science frames.
    InsufficientCoverage {
        camera: CameraId,
        source: SourceId,
        measured: usize,
        frames: usize,
    },
}

/// Summary of a run, returned alongside whatever output succeeded.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RunReport {
    pub cameras_reduced: Vec<CameraId>,
    pub science_frames: usize,
    pub frames_calibrated: usize,
    pub frames_registered: usize,
    pub measurements: usize,
    pub warnings: Vec<RunWarning>,
}

impl RunReport {
    pub fn push(&mut self, warning: RunWarning) {
        self.warnings.push(warning);
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn rejected_calibration_frames(&self) -> impl Iterator<Item = &RejectedFrame> {
        self.warnings.iter().filter_map(|w| match w {
            RunWarning::RejectedCalibrationFrame(r) => Some(r),
            _ => None,
        })
    }

    /// Frames that failed registration, with the reason.
    pub fn failed_registrations(&self) -> impl Iterator<Item = (CameraId, FrameId, &RegistrationFailure)> {
        self.warnings.iter().filter_map(|w| match w {
            RunWarning::RegistrationFailed {
                camera,
                frame,
                reason,
            } => Some((*camera, *frame, reason)),
            _ => None,
        })
    }

    pub fn failed_cameras(&self) -> impl Iterator<Item = (CameraId, &str)> {
        self.warnings.iter().filter_map(|w| match w {
            RunWarning::CameraFailed { camera, reason } => Some((*camera, reason.as_str())),
            _ => None,
        })
    }
}
