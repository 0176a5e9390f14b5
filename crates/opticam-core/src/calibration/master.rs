use ndarray::Array2;
use tracing::{debug, info, warn};

use crate::consts::{CALIBRATION_REJECTION_RELATIVE_FLOOR, EPSILON};
use crate::error::{ReductionError, Result};
use crate::frame::{CameraId, FrameId, FrameKind, RawFrame};
use crate::pipeline::config::CalibrationConfig;
use crate::stats::{mad_sigma_f64, mean_stddev, median_f64};

use super::combine::{combine_arrays, CombineMethod};

/// A combined bias, dark or flat frame for one camera.
///
/// Darks are stored bias-subtracted at `exposure` seconds; flats are
/// bias/dark-subtracted and normalized to mean 1.0.
#[derive(Clone, Debug)]
pub struct MasterCalibration {
    pub camera: CameraId,
    pub kind: FrameKind,
    pub data: Array2<f32>,
    /// Frames that contributed to the combination.
    pub frames_used: usize,
    pub method: CombineMethod,
    /// Exposure (seconds) the master represents; meaningful for darks.
    pub exposure: f64,
}

/// A calibration frame excluded from a master because its global statistics
/// (or shape) disagreed with the rest of the stack.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct RejectedFrame {
    pub camera: CameraId,
    pub kind: FrameKind,
    pub frame: FrameId,
    pub reason: String,
}

/// Result of a master build: the master plus frames excluded on the way.
#[derive(Clone, Debug)]
pub struct MasterBuild {
    pub master: MasterCalibration,
    pub rejected: Vec<RejectedFrame>,
}

/// The three masters a camera needs, shared read-only by every calibration worker.
#[derive(Clone, Debug)]
pub struct CalibrationSet {
    pub camera: CameraId,
    pub bias: MasterCalibration,
    pub dark: MasterCalibration,
    pub flat: MasterCalibration,
}

impl CalibrationSet {
    pub fn dim(&self) -> (usize, usize) {
        self.bias.data.dim()
    }
}

/// Build bias, dark and flat masters for one camera, in dependency order.
///
/// Returns the set plus every frame rejected along the way.
pub fn build_calibration_set(
    camera: CameraId,
    bias_frames: &[RawFrame],
    dark_frames: &[RawFrame],
    flat_frames: &[RawFrame],
    config: &CalibrationConfig,
) -> Result<(CalibrationSet, Vec<RejectedFrame>)> {
    let bias = build_master(camera, FrameKind::Bias, bias_frames, None, None, config)?;
    let dark = build_master(
        camera,
        FrameKind::Dark,
        dark_frames,
        Some(&bias.master),
        None,
        config,
    )?;
    let flat = build_master(
        camera,
        FrameKind::Flat,
        flat_frames,
        Some(&bias.master),
        Some(&dark.master),
        config,
    )?;

    let rejected = bias
        .rejected
        .into_iter()
        .chain(dark.rejected)
        .chain(flat.rejected)
        .collect();

    Ok((
        CalibrationSet {
            camera,
            bias: bias.master,
            dark: dark.master,
            flat: flat.master,
        },
        rejected,
    ))
}

/// Combine a stack of raw calibration frames of one kind into a master.
///
/// Frames of the wrong kind, camera or shape, and frames whose global mean or
/// spread deviates from the stack median by more than `rejection_sigma`
/// robust sigmas, are excluded and reported rather than failing the build.
/// Fails with `InsufficientCalibrationFrames` when fewer than `min_frames`
/// remain.
pub fn build_master(
    camera: CameraId,
    kind: FrameKind,
    frames: &[RawFrame],
    bias: Option<&MasterCalibration>,
    dark: Option<&MasterCalibration>,
    config: &CalibrationConfig,
) -> Result<MasterBuild> {
    let mut rejected = Vec::new();
    let reject = |frame: &RawFrame, reason: String, rejected: &mut Vec<RejectedFrame>| {
        warn!(%camera, %kind, frame = %frame.id, %reason, "Rejected calibration frame");
        rejected.push(RejectedFrame {
            camera,
            kind,
            frame: frame.id,
            reason,
        });
    };

    let expected_dim = bias
        .map(|b| b.data.dim())
        .or_else(|| frames.first().map(|f| f.data.dim()));
    let common_exposure = frames.first().map(|f| f.exposure).unwrap_or(0.0);

    // Prepare each frame: shape check, then bias/dark removal and scaling.
    let mut prepared: Vec<(FrameId, Array2<f32>)> = Vec::with_capacity(frames.len());
    for frame in frames {
        if frame.kind != kind || frame.camera != camera {
            reject(
                frame,
                format!("expected {kind} from {camera}, got {} from {}", frame.kind, frame.camera),
                &mut rejected,
            );
            continue;
        }
        if Some(frame.data.dim()) != expected_dim {
            reject(
                frame,
                format!("shape {:?} differs from {:?}", frame.data.dim(), expected_dim),
                &mut rejected,
            );
            continue;
        }
        match prepare_frame(frame, kind, bias, dark, common_exposure) {
            Ok(data) => prepared.push((frame.id, data)),
            Err(reason) => reject(frame, reason, &mut rejected),
        }
    }

    // Global-statistics rejection against the stack median.
    let stats: Vec<(f64, f64)> = prepared
        .iter()
        .map(|(_, data)| frame_statistics(data))
        .collect();
    let outliers = find_outliers(&stats, config.rejection_sigma);
    let mut usable: Vec<&Array2<f32>> = Vec::with_capacity(prepared.len());
    for ((id, data), &is_outlier) in prepared.iter().zip(&outliers) {
        if is_outlier {
            if let Some(frame) = frames.iter().find(|f| f.id == *id) {
                let (mean, std) = frame_statistics(data);
                reject(
                    frame,
                    format!("global statistics deviate from stack (mean {mean:.3}, std {std:.3})"),
                    &mut rejected,
                );
            }
        } else {
            usable.push(data);
        }
    }

    if usable.len() < config.min_frames.max(1) {
        return Err(ReductionError::InsufficientCalibrationFrames {
            camera,
            kind,
            usable: usable.len(),
            required: config.min_frames.max(1),
        });
    }

    let mut data = combine_arrays(&usable, &config.combine)?;
    if kind == FrameKind::Flat {
        normalize_to_unit_mean(&mut data);
    }

    info!(
        %camera,
        %kind,
        used = usable.len(),
        rejected = rejected.len(),
        method = %config.combine,
        "Master calibration built"
    );

    Ok(MasterBuild {
        master: MasterCalibration {
            camera,
            kind,
            data,
            frames_used: usable.len(),
            method: config.combine.clone(),
            exposure: if kind == FrameKind::Bias { 0.0 } else { common_exposure },
        },
        rejected,
    })
}

/// Remove the lower-level masters from a raw calibration frame.
///
/// Darks are bias-subtracted and scaled to the stack's common exposure.
/// Flats are bias/dark-subtracted and normalized by their own mean so that
/// frames taken at different illumination levels combine cleanly.
fn prepare_frame(
    frame: &RawFrame,
    kind: FrameKind,
    bias: Option<&MasterCalibration>,
    dark: Option<&MasterCalibration>,
    common_exposure: f64,
) -> std::result::Result<Array2<f32>, String> {
    let mut data = frame.data.clone();
    if let Some(bias) = bias {
        data -= &bias.data;
    }
    match kind {
        FrameKind::Dark => {
            if frame.exposure > EPSILON && common_exposure > EPSILON {
                let scale = (common_exposure / frame.exposure) as f32;
                data.mapv_inplace(|v| v * scale);
            }
        }
        FrameKind::Flat => {
            if let Some(dark) = dark {
                let scale = dark_scale(frame.exposure, dark.exposure);
                data.zip_mut_with(&dark.data, |v, &d| *v -= d * scale);
            }
            let level = finite_mean(&data);
            if level <= EPSILON {
                return Err(format!("non-positive flat level {level:.3}"));
            }
            let inv = (1.0 / level) as f32;
            data.mapv_inplace(|v| v * inv);
        }
        FrameKind::Bias | FrameKind::Science => {}
    }
    Ok(data)
}

/// Ratio used to scale a master dark to a frame's exposure.
pub(crate) fn dark_scale(frame_exposure: f64, dark_exposure: f64) -> f32 {
    if dark_exposure > EPSILON {
        (frame_exposure / dark_exposure) as f32
    } else {
        1.0
    }
}

fn frame_statistics(data: &Array2<f32>) -> (f64, f64) {
    let values: Vec<f32> = data.iter().copied().filter(|v| v.is_finite()).collect();
    mean_stddev(&values)
}

fn finite_mean(data: &Array2<f32>) -> f64 {
    let (sum, count) = data
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0f64, 0usize), |(s, c), &v| (s + v as f64, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn normalize_to_unit_mean(data: &mut Array2<f32>) {
    let mean = finite_mean(data);
    if mean > EPSILON {
        let inv = (1.0 / mean) as f32;
        data.mapv_inplace(|v| v * inv);
    }
}

/// Flag frames whose mean or standard deviation lies further than
/// `sigma` robust sigmas from the stack median.
fn find_outliers(stats: &[(f64, f64)], sigma: f64) -> Vec<bool> {
    if stats.len() < 3 {
        return vec![false; stats.len()];
    }
    let means: Vec<f64> = stats.iter().map(|s| s.0).collect();
    let stds: Vec<f64> = stats.iter().map(|s| s.1).collect();
    let mean_band = rejection_band(&means, sigma);
    let std_band = rejection_band(&stds, sigma);

    stats
        .iter()
        .map(|&(mean, std)| {
            let out = (mean - mean_band.0).abs() > mean_band.1 || (std - std_band.0).abs() > std_band.1;
            if out {
                debug!(mean, std, "Calibration frame outside rejection band");
            }
            out
        })
        .collect()
}

/// (center, half-width) of the acceptance band for one statistic.
fn rejection_band(values: &[f64], sigma: f64) -> (f64, f64) {
    let center = median_f64(values).unwrap_or(0.0);
    let spread = mad_sigma_f64(values, center);
    let floor = (CALIBRATION_REJECTION_RELATIVE_FLOOR * center.abs()).max(EPSILON.sqrt());
    (center, (sigma * spread).max(floor))
}
