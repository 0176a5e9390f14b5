use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use tracing::{info, warn};

use crate::calibration::{build_calibration_set, calibrate_frame, CombineMethod, SigmaClipParams};
use crate::detection::{build_catalog, stack_registered, ReferenceImage, SourceCatalog};
use crate::error::{ReductionError, RegistrationFailure, Result};
use crate::frame::{CalibratedFrame, FrameId};
use crate::photometry::{measure_frame, Measurement};
use crate::registration::{
    coarse_shift, register_sources, registration_sources, select_reference, Registration,
};

use super::config::ReductionConfig;
use super::report::RunWarning;
use super::types::{CameraFrames, CancelToken, PipelineStage, ProgressReporter};

/// Everything one camera contributes to the run.
pub(super) struct CameraReduction {
    pub catalog: SourceCatalog,
    pub reference: ReferenceImage,
    pub registrations: BTreeMap<FrameId, Registration>,
    pub frames_calibrated: usize,
    pub measurements: Vec<Measurement>,
    pub warnings: Vec<RunWarning>,
}

/// Run `f` over `items` in parallel, checking `cancel` before each item and
/// reporting completions counted from `already_done`.
fn par_stage<T, U, F>(
    items: &[T],
    already_done: usize,
    cancel: &CancelToken,
    reporter: &dyn ProgressReporter,
    f: F,
) -> Result<Vec<U>>
where
    T: Sync,
    U: Send,
    F: Fn(&T) -> U + Sync + Send,
{
    let done = AtomicUsize::new(already_done);
    items
        .par_iter()
        .map(|item| {
            cancel.check()?;
            let out = f(item);
            reporter.advance(done.fetch_add(1, Ordering::Relaxed) + 1);
            Ok(out)
        })
        .collect()
}

/// Calibrate, register, detect and measure one camera.
///
/// Frame-local problems become warnings; an `Err` means the camera
/// produced nothing usable (or the run was cancelled).
pub(super) fn reduce_camera(
    input: &CameraFrames,
    config: &ReductionConfig,
    cancel: &CancelToken,
    reporter: &dyn ProgressReporter,
) -> Result<CameraReduction> {
    let camera = input.camera;
    let mut warnings = Vec::new();
    if input.science.is_empty() {
        return Err(ReductionError::EmptySequence);
    }

    // Masters, then science frames.
    let (masters, rejected) = build_calibration_set(
        camera,
        &input.bias,
        &input.darks,
        &input.flats,
        &config.calibration,
    )?;
    warnings.extend(rejected.into_iter().map(RunWarning::RejectedCalibrationFrame));

    reporter.begin_stage(PipelineStage::Calibrating, Some(camera), Some(input.science.len()));
    let calibrated = par_stage(&input.science, 0, cancel, reporter, |raw| {
        (raw.id, calibrate_frame(raw, &masters, &config.calibration, &config.sensor))
    })?;
    reporter.finish_stage();
    let mut frames: Vec<CalibratedFrame> = Vec::with_capacity(calibrated.len());
    for (id, result) in calibrated {
        match result {
            Ok(frame) => frames.push(frame),
            Err(e) => {
                warn!(%camera, frame = %id, error = %e, "science frame not calibrated");
                warnings.push(RunWarning::CalibrationFailed {
                    camera,
                    frame: id,
                    reason: e.to_string(),
                });
            }
        }
    }
    if frames.is_empty() {
        return Err(ReductionError::EmptySequence);
    }
    let frames_calibrated = frames.len();

    // Registration against the reference frame: one pass to find sources,
    // one to fit transforms.
    let n = frames.len();
    reporter.begin_stage(PipelineStage::Registering, Some(camera), Some(2 * n));
    let reg_config = &config.registration;
    let sources = par_stage(&frames, 0, cancel, reporter, |frame| {
        registration_sources(frame, &config.detection, reg_config)
    })?;
    let ref_idx = select_reference(&sources, reg_config).ok_or_else(|| {
        ReductionError::RegistrationFailed(RegistrationFailure::TooFewSources {
            found: sources.iter().map(Vec::len).max().unwrap_or(0),
            required: reg_config.min_matched_pairs,
        })
    })?;
    let reference_frame = &frames[ref_idx];
    let reference_sources = &sources[ref_idx];
    info!(
        %camera,
        reference = %reference_frame.id,
        sources = reference_sources.len(),
        "registration reference selected"
    );

    let indexed: Vec<usize> = (0..n).collect();
    let outcomes = par_stage(&indexed, n, cancel, reporter, |&i| {
        if i == ref_idx {
            return Ok(Registration::identity());
        }
        let shift = coarse_shift(&reference_frame.data, &frames[i].data, reg_config);
        register_sources(
            reference_sources,
            &sources[i],
            shift,
            reg_config,
            reg_config.max_flux_ratio,
        )
    })?;
    reporter.finish_stage();

    let mut registrations = BTreeMap::new();
    let mut registered: Vec<(&CalibratedFrame, Registration)> = Vec::new();
    for (frame, outcome) in frames.iter().zip(outcomes) {
        match outcome {
            Ok(reg) => {
                registrations.insert(frame.id, reg.clone());
                registered.push((frame, reg));
            }
            Err(reason) => {
                warn!(%camera, frame = %frame.id, %reason, "frame registration failed");
                warnings.push(RunWarning::RegistrationFailed {
                    camera,
                    frame: frame.id,
                    reason,
                });
            }
        }
    }

    // Deep reference image and catalog.
    let stack_inputs: Vec<(&CalibratedFrame, _)> = registered
        .iter()
        .take(config.detection.stack_frames)
        .map(|(f, reg)| (*f, reg.transform))
        .collect();
    reporter.begin_stage(PipelineStage::Stacking, Some(camera), None);
    let reference = stack_registered(
        camera,
        &stack_inputs,
        &CombineMethod::SigmaClippedMean(SigmaClipParams::default()),
    )?;
    reporter.finish_stage();

    reporter.begin_stage(PipelineStage::Detecting, Some(camera), None);
    let catalog = build_catalog(&reference, &config.detection, config.photometry.method.radius())?;
    reporter.finish_stage();

    // Photometry on every registered frame.
    reporter.begin_stage(PipelineStage::Measuring, Some(camera), Some(registered.len()));
    let measured = par_stage(&registered, 0, cancel, reporter, |(frame, reg)| {
        (
            frame.id,
            measure_frame(frame, &reg.transform, &catalog, &config.photometry, &config.sensor),
        )
    })?;
    reporter.finish_stage();
    let mut measurements = Vec::new();
    for (id, result) in measured {
        match result {
            Ok(mut m) => measurements.append(&mut m),
            Err(e) => {
                warn!(%camera, frame = %id, error = %e, "photometry failed");
                warnings.push(RunWarning::PhotometryFailed {
                    camera,
                    frame: id,
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        %camera,
        calibrated = frames_calibrated,
        registered = registrations.len(),
        sources = catalog.len(),
        measurements = measurements.len(),
        "camera reduced"
    );
    Ok(CameraReduction {
        catalog,
        reference,
        registrations,
        frames_calibrated,
        measurements,
        warnings,
    })
}
