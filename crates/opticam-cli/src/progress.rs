use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressStyle};
use opticam_core::frame::CameraId;
use opticam_core::pipeline::{PipelineStage, ProgressReporter};

/// Drives one terminal progress bar per pipeline stage.
#[derive(Default)]
pub struct BarReporter {
    current: Mutex<Option<ProgressBar>>,
}

impl BarReporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn label(stage: PipelineStage, camera: Option<CameraId>) -> String {
        match camera {
            Some(camera) => format!("{stage} ({camera})"),
            None => stage.to_string(),
        }
    }
}

impl ProgressReporter for BarReporter {
    fn begin_stage(&self, stage: PipelineStage, camera: Option<CameraId>, total_items: Option<usize>) {
        let bar = match total_items {
            Some(total) => {
                let bar = ProgressBar::new(total as u64);
                if let Ok(style) = ProgressStyle::default_bar().template("{msg:32} [{bar:40}] {pos}/{len}") {
                    bar.set_style(style.progress_chars("=> "));
                }
                bar
            }
            None => ProgressBar::new_spinner(),
        };
        bar.set_message(Self::label(stage, camera));
        if let Ok(mut current) = self.current.lock() {
            if let Some(previous) = current.replace(bar) {
                previous.finish();
            }
        }
    }

    fn advance(&self, items_done: usize) {
        if let Ok(current) = self.current.lock() {
            if let Some(bar) = current.as_ref() {
                bar.set_position(items_done as u64);
            }
        }
    }

    fn finish_stage(&self) {
        if let Ok(mut current) = self.current.lock() {
            if let Some(bar) = current.take() {
                bar.finish();
            }
        }
    }
}
