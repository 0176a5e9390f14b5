use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::detection::SourceCatalog;
use crate::error::{ReductionError, Result};
use crate::frame::{CameraId, FrameId, SourceId};
use crate::lightcurve::{LightCurve, LightCurveAssembler};
use crate::registration::Registration;

use super::camera::{reduce_camera, CameraReduction};
use super::config::ReductionConfig;
use super::field::{align_field, FieldAlignment};
use super::report::{RunReport, RunWarning};
use super::types::{CancelToken, NoOpReporter, ObservationSet, PipelineStage, ProgressReporter};

/// In-memory result of a reduction run.
#[derive(Clone, Debug, Serialize)]
pub struct ReductionOutput {
    /// One catalog per successfully reduced camera.
    pub catalogs: BTreeMap<CameraId, SourceCatalog>,
    /// One curve per (camera, source), ordered by camera then source.
    pub light_curves: Vec<LightCurve>,
    /// Frame -> camera reference transforms of every registered frame.
    pub registrations: BTreeMap<CameraId, BTreeMap<FrameId, Registration>>,
    pub field: FieldAlignment,
    pub report: RunReport,
}

impl ReductionOutput {
    pub fn light_curve(&self, camera: CameraId, source: SourceId) -> Option<&LightCurve> {
        self.light_curves
            .iter()
            .find(|c| c.camera == camera && c.source == source)
    }

    pub fn curves_for(&self, camera: CameraId) -> impl Iterator<Item = &LightCurve> {
        self.light_curves.iter().filter(move |c| c.camera == camera)
    }
}

/// Run the full reduction with a thread-safe progress reporter.
///
/// Cameras are reduced one after another; frames within a camera run on a
/// worker pool of `config.workers` threads. Camera-local failures are
/// recorded in the report and the remaining cameras continue.
pub fn reduce(
    input: &ObservationSet,
    config: &ReductionConfig,
    cancel: &CancelToken,
    reporter: Arc<dyn ProgressReporter>,
) -> Result<ReductionOutput> {
    config.validate()?;
    check_cameras(input)?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers)
        .build()?;
    info!(
        cameras = input.cameras.len(),
        science_frames = input.science_frame_count(),
        workers = pool.current_num_threads(),
        "Starting reduction"
    );
    pool.install(|| run(input, config, cancel, reporter.as_ref()))
}

/// Run the full reduction without progress reporting or cancellation.
pub fn reduce_observation(input: &ObservationSet, config: &ReductionConfig) -> Result<ReductionOutput> {
    reduce(input, config, &CancelToken::new(), Arc::new(NoOpReporter))
}

fn check_cameras(input: &ObservationSet) -> Result<()> {
    if input.cameras.is_empty() {
        return Err(ReductionError::EmptySequence);
    }
    let mut seen = BTreeSet::new();
    for frames in &input.cameras {
        if !seen.insert(frames.camera) {
            return Err(ReductionError::InvalidConfig(format!(
                "{} appears more than once in the observation",
                frames.camera
            )));
        }
    }
    Ok(())
}

fn run(
    input: &ObservationSet,
    config: &ReductionConfig,
    cancel: &CancelToken,
    reporter: &dyn ProgressReporter,
) -> Result<ReductionOutput> {
    let mut report = RunReport {
        science_frames: input.science_frame_count(),
        ..RunReport::default()
    };
    let mut assembler = LightCurveAssembler::new(&config.light_curves);
    let mut reduced: Vec<(CameraId, usize, CameraReduction)> = Vec::new();

    for frames in &input.cameras {
        cancel.check()?;
        let camera = frames.camera;
        match reduce_camera(frames, config, cancel, reporter) {
            Ok(mut reduction) => {
                report.cameras_reduced.push(camera);
                report.frames_calibrated += reduction.frames_calibrated;
                report.frames_registered += reduction.registrations.len();
                report.measurements += reduction.measurements.len();
                report.warnings.append(&mut reduction.warnings);
                assembler.ingest_all(std::mem::take(&mut reduction.measurements));
                reduced.push((camera, frames.science.len(), reduction));
            }
            Err(ReductionError::Cancelled) => return Err(ReductionError::Cancelled),
            Err(e) => {
                warn!(%camera, error = %e, "camera reduction failed");
                reporter.finish_stage();
                report.push(RunWarning::CameraFailed {
                    camera,
                    reason: e.to_string(),
                });
            }
        }
    }

    cancel.check()?;
    reporter.begin_stage(PipelineStage::CrossCamera, None, Some(reduced.len()));
    let inputs: Vec<_> = reduced
        .iter()
        .map(|(_, _, r)| (&r.catalog, &r.reference))
        .collect();
    let field = align_field(&inputs, &config.registration);
    for (camera, reason) in &field.failures {
        report.push(RunWarning::FieldRegistrationFailed {
            camera: *camera,
            reason: reason.clone(),
        });
    }
    reporter.finish_stage();

    reporter.begin_stage(PipelineStage::Assembling, None, Some(assembler.group_count()));
    let assembly = assembler.finish();
    report
        .warnings
        .extend(assembly.dropped.into_iter().map(RunWarning::MeasurementDropped));
    let light_curves = assembly.curves;
    reporter.finish_stage();

    // Coverage is judged against every science frame of the camera, so
    // frames lost to calibration or registration count against a source.
    let lengths: BTreeMap<(CameraId, SourceId), usize> = light_curves
        .iter()
        .map(|c| ((c.camera, c.source), c.len()))
        .collect();
    let mut catalogs = BTreeMap::new();
    let mut registrations = BTreeMap::new();
    for (camera, science, reduction) in reduced {
        for entry in &reduction.catalog.entries {
            let measured = lengths.get(&(camera, entry.id)).copied().unwrap_or(0);
            if science > 0 && (measured as f64) < config.light_curves.min_coverage * science as f64 {
                warn!(%camera, source = %entry.id, measured, frames = science, "insufficient coverage");
                report.push(RunWarning::InsufficientCoverage {
                    camera,
                    source: entry.id,
                    measured,
                    frames: science,
                });
            }
        }
        catalogs.insert(camera, reduction.catalog);
        registrations.insert(camera, reduction.registrations);
    }

    info!(
        cameras = report.cameras_reduced.len(),
        curves = light_curves.len(),
        measurements = report.measurements,
        warnings = report.warnings.len(),
        "Reduction complete"
    );
    Ok(ReductionOutput {
        catalogs,
        light_curves,
        registrations,
        field,
        report,
    })
}
