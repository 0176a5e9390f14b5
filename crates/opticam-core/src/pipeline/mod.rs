pub mod config;
mod camera;
mod field;
mod orchestrator;
mod report;
mod types;

pub use field::{FieldAlignment, FieldSource};
pub use orchestrator::{reduce, reduce_observation, ReductionOutput};
pub use report::{RunReport, RunWarning};
pub use types::{CameraFrames, CancelToken, ObservationSet, PipelineStage, ProgressReporter};
