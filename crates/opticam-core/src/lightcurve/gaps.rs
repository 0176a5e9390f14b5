use serde::{Deserialize, Serialize};

use crate::frame::FrameId;
use crate::photometry::Measurement;

/// An interval between consecutive measurements that is long compared
/// with the typical cadence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Gap {
    /// Last frame before the gap.
    pub after: FrameId,
    /// First frame after the gap.
    pub before: FrameId,
    pub start: f64,
    pub end: f64,
}

impl Gap {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Median spacing of time-ordered measurements; `None` below two points.
pub fn median_cadence(measurements: &[Measurement]) -> Option<f64> {
    let steps: Vec<f64> = measurements
        .windows(2)
        .map(|w| w[1].timestamp - w[0].timestamp)
        .collect();
    crate::stats::median_f64(&steps)
}

/// Intervals longer than `factor` times the median cadence.
pub fn find_gaps(measurements: &[Measurement], factor: f64) -> Vec<Gap> {
    let Some(cadence) = median_cadence(measurements) else {
        return Vec::new();
    };
    if cadence <= 0.0 {
        return Vec::new();
    }
    measurements
        .windows(2)
        .filter(|w| w[1].timestamp - w[0].timestamp > factor * cadence)
        .map(|w| Gap {
            after: w[0].frame,
            before: w[1].frame,
            start: w[0].timestamp,
            end: w[1].timestamp,
        })
        .collect()
}
