use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ReductionError, Result};
use crate::frame::{CameraId, FrameId, SourceId};
use crate::registration::Point;

use super::config::DetectionConfig;
use super::detector::{detect_sources, Shape};
use super::stack::ReferenceImage;

/// One detected source, in the camera's reference-frame coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceCatalogEntry {
    pub id: SourceId,
    pub camera: CameraId,
    pub pos: Point,
    /// Flux in the reference image (ADU).
    pub flux: f64,
    pub peak_sigma: f64,
    pub shape: Shape,
    /// Radius used when this source is measured (pixels).
    pub aperture_radius: f64,
}

/// The fixed set of sources measured in every frame of one camera.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceCatalog {
    pub camera: CameraId,
    /// Frames combined into the detection image.
    pub stacked_frames: Vec<FrameId>,
    pub entries: Vec<SourceCatalogEntry>,
}

impl SourceCatalog {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: SourceId) -> Option<&SourceCatalogEntry> {
        self.entries.iter().find(|e| e.id == id)
    }
}

/// Detect sources in a camera's reference image and number them from 1,
/// brightest first.
pub fn build_catalog(
    image: &ReferenceImage,
    config: &DetectionConfig,
    aperture_radius: f64,
) -> Result<SourceCatalog> {
    let detections = detect_sources(&image.data, Some(&image.mask), config);
    if detections.is_empty() {
        return Err(ReductionError::DetectionEmpty {
            camera: image.camera,
        });
    }

    let entries: Vec<SourceCatalogEntry> = detections
        .into_iter()
        .enumerate()
        .map(|(i, det)| SourceCatalogEntry {
            id: SourceId(i as u32 + 1),
            camera: image.camera,
            pos: det.pos,
            flux: det.flux,
            peak_sigma: det.peak_sigma,
            shape: det.shape,
            aperture_radius,
        })
        .collect();

    info!(camera = %image.camera, sources = entries.len(), "source catalog built");
    Ok(SourceCatalog {
        camera: image.camera,
        stacked_frames: image.frames.clone(),
        entries,
    })
}
