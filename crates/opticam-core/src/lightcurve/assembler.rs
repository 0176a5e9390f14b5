use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::frame::{CameraId, FrameId, SourceId};
use crate::photometry::{Measurement, QualityFlag};
use crate::pipeline::config::LightCurveConfig;

use super::gaps::{find_gaps, median_cadence, Gap};

/// Time-ordered measurements of one source seen by one camera.
///
/// Timestamps are strictly increasing and frame ids unique.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LightCurve {
    pub source: SourceId,
    pub camera: CameraId,
    pub measurements: Vec<Measurement>,
    pub gaps: Vec<Gap>,
    pub median_cadence: Option<f64>,
}

impl LightCurve {
    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    pub fn timestamps(&self) -> impl Iterator<Item = f64> + '_ {
        self.measurements.iter().map(|m| m.timestamp)
    }

    pub fn fluxes(&self) -> impl Iterator<Item = f64> + '_ {
        self.measurements.iter().map(|m| m.flux)
    }

    /// Measurements carrying `flag`.
    pub fn count_flag(&self, flag: QualityFlag) -> usize {
        self.measurements.iter().filter(|m| m.flag == flag).count()
    }
}

/// A measurement left out of its light curve.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DroppedMeasurement {
    /// A second measurement for a frame already in the curve.
    DuplicateFrame {
        camera: CameraId,
        source: SourceId,
        frame: FrameId,
    },
    /// Same timestamp as an earlier frame of the curve.
    RepeatedTimestamp {
        camera: CameraId,
        source: SourceId,
        frame: FrameId,
        timestamp: f64,
    },
}

/// Finished light curves plus what assembly had to drop.
#[derive(Clone, Debug, Default)]
pub struct Assembly {
    pub curves: Vec<LightCurve>,
    pub dropped: Vec<DroppedMeasurement>,
}

/// Streaming reduction of measurements into light curves.
///
/// Measurements may arrive in any order; the result depends only on the
/// set ingested.
#[derive(Debug)]
pub struct LightCurveAssembler {
    config: LightCurveConfig,
    groups: BTreeMap<(CameraId, SourceId), BTreeMap<FrameId, Measurement>>,
    dropped: Vec<DroppedMeasurement>,
}

impl LightCurveAssembler {
    pub fn new(config: &LightCurveConfig) -> Self {
        Self {
            config: config.clone(),
            groups: BTreeMap::new(),
            dropped: Vec::new(),
        }
    }

    pub fn ingest(&mut self, measurement: Measurement) {
        let key = (measurement.camera, measurement.source);
        let frames = self.groups.entry(key).or_default();
        match frames.entry(measurement.frame) {
            Entry::Vacant(slot) => {
                slot.insert(measurement);
            }
            Entry::Occupied(mut slot) => {
                warn!(
                    camera = %measurement.camera,
                    source = %measurement.source,
                    frame = %measurement.frame,
                    "duplicate measurement dropped"
                );
                self.dropped.push(DroppedMeasurement::DuplicateFrame {
                    camera: measurement.camera,
                    source: measurement.source,
                    frame: measurement.frame,
                });
                // Keep the better of the two so arrival order does not matter.
                if preferred(&measurement, slot.get()) {
                    slot.insert(measurement);
                }
            }
        }
    }

    pub fn ingest_all(&mut self, measurements: impl IntoIterator<Item = Measurement>) {
        for m in measurements {
            self.ingest(m);
        }
    }

    /// Number of distinct (camera, source) groups seen so far.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn finish(self) -> Assembly {
        let mut dropped = self.dropped;
        let mut curves = Vec::with_capacity(self.groups.len());

        for ((camera, source), frames) in self.groups {
            let mut ordered: Vec<Measurement> = frames.into_values().collect();
            ordered.sort_by(|a, b| {
                a.timestamp
                    .total_cmp(&b.timestamp)
                    .then(a.frame.cmp(&b.frame))
            });

            let mut measurements: Vec<Measurement> = Vec::with_capacity(ordered.len());
            for m in ordered {
                if let Some(last) = measurements.last() {
                    if m.timestamp <= last.timestamp {
                        warn!(
                            %camera,
                            %source,
                            frame = %m.frame,
                            timestamp = m.timestamp,
                            "measurement with repeated timestamp dropped"
                        );
                        dropped.push(DroppedMeasurement::RepeatedTimestamp {
                            camera,
                            source,
                            frame: m.frame,
                            timestamp: m.timestamp,
                        });
                        continue;
                    }
                }
                measurements.push(m);
            }

            let gaps = find_gaps(&measurements, self.config.gap_factor);
            if !gaps.is_empty() {
                debug!(%camera, %source, gaps = gaps.len(), "light curve has gaps");
            }
            curves.push(LightCurve {
                source,
                camera,
                median_cadence: median_cadence(&measurements),
                measurements,
                gaps,
            });
        }

        Assembly { curves, dropped }
    }
}

/// Batch form of [`LightCurveAssembler`].
pub fn assemble(
    measurements: impl IntoIterator<Item = Measurement>,
    config: &LightCurveConfig,
) -> Assembly {
    let mut assembler = LightCurveAssembler::new(config);
    assembler.ingest_all(measurements);
    assembler.finish()
}

/// Order-independent choice between two measurements of the same frame.
fn preferred(candidate: &Measurement, current: &Measurement) -> bool {
    let rank = |m: &Measurement| (m.flag != QualityFlag::Ok, m.flux_err);
    let (a, b) = (rank(candidate), rank(current));
    a.0.cmp(&b.0)
        .then(a.1.total_cmp(&b.1))
        .then(candidate.flux.total_cmp(&current.flux))
        .is_lt()
}
