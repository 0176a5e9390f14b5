//! Differential photometry on assembled light curves.
//!
//! Runs after reduction: the pipeline never normalizes fluxes itself.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ReductionError, Result};
use crate::frame::{CameraId, FrameId, SourceId};
use crate::lightcurve::LightCurve;
use crate::photometry::QualityFlag;

/// One target / comparison flux ratio.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelativePoint {
    pub frame: FrameId,
    pub timestamp: f64,
    pub ratio: f64,
    pub ratio_err: f64,
    /// Worst flag among the target and comparison measurements.
    pub flag: QualityFlag,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelativeLightCurve {
    pub target: SourceId,
    pub comparisons: Vec<SourceId>,
    pub camera: CameraId,
    pub points: Vec<RelativePoint>,
}

/// Divide `target` by the summed flux of `comparisons`.
///
/// Only frames present in every curve contribute. Relative errors add in
/// quadrature. All curves must come from the same camera.
pub fn differential(target: &LightCurve, comparisons: &[&LightCurve]) -> Result<RelativeLightCurve> {
    if comparisons.is_empty() {
        return Err(ReductionError::InvalidConfig(
            "differential photometry needs at least one comparison source".into(),
        ));
    }
    if let Some(other) = comparisons.iter().find(|c| c.camera != target.camera) {
        return Err(ReductionError::InvalidConfig(format!(
            "comparison {} is from {}, target {} from {}",
            other.source, other.camera, target.source, target.camera
        )));
    }

    let indexed: Vec<BTreeMap<FrameId, _>> = comparisons
        .iter()
        .map(|c| c.measurements.iter().map(|m| (m.frame, m)).collect())
        .collect();

    let points = target
        .measurements
        .iter()
        .filter_map(|t| {
            let matched: Vec<_> = indexed
                .iter()
                .map(|idx| idx.get(&t.frame).copied())
                .collect::<Option<Vec<_>>>()?;
            let comp_flux: f64 = matched.iter().map(|m| m.flux).sum();
            if comp_flux <= 0.0 || t.flux == 0.0 {
                return None;
            }
            let comp_var: f64 = matched.iter().map(|m| m.flux_err * m.flux_err).sum();
            let ratio = t.flux / comp_flux;
            let rel = ((t.flux_err / t.flux).powi(2) + comp_var / (comp_flux * comp_flux)).sqrt();
            let flag = matched
                .iter()
                .map(|m| m.flag)
                .chain(std::iter::once(t.flag))
                .max_by_key(|f| severity(*f))
                .unwrap_or(QualityFlag::Ok);
            Some(RelativePoint {
                frame: t.frame,
                timestamp: t.timestamp,
                ratio,
                ratio_err: ratio.abs() * rel,
                flag,
            })
        })
        .collect();

    Ok(RelativeLightCurve {
        target: target.source,
        comparisons: comparisons.iter().map(|c| c.source).collect(),
        camera: target.camera,
        points,
    })
}

fn severity(flag: QualityFlag) -> u8 {
    match flag {
        QualityFlag::Ok => 0,
        QualityFlag::LowSnr => 1,
        QualityFlag::Edge => 2,
        QualityFlag::Saturated => 3,
    }
}
