use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, warn};

use crate::detection::{Detection, ReferenceImage, Shape, SourceCatalog};
use crate::error::RegistrationFailure;
use crate::frame::{CameraId, SourceId};
use crate::registration::{coarse_shift, match_sources, register_catalogs, MatchParams, Point, Transform};

use super::config::RegistrationConfig;

/// One physical star as seen by the cameras that detected it.
///
/// Associations only reference per-camera catalog ids; catalogs themselves
/// are never modified.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FieldSource {
    pub id: u32,
    /// Position in the field reference camera's coordinates.
    pub pos: Point,
    pub members: Vec<(CameraId, SourceId)>,
}

impl FieldSource {
    pub fn member(&self, camera: CameraId) -> Option<SourceId> {
        self.members
            .iter()
            .find(|(c, _)| *c == camera)
            .map(|(_, s)| *s)
    }
}

/// Mapping of every reduced camera onto a common field.
#[derive(Clone, Debug, Default, Serialize)]
pub struct FieldAlignment {
    pub reference_camera: Option<CameraId>,
    /// Camera reference coordinates -> field coordinates.
    pub transforms: BTreeMap<CameraId, Transform>,
    pub sources: Vec<FieldSource>,
    pub failures: Vec<(CameraId, RegistrationFailure)>,
}

/// Register each camera's catalog onto the field reference camera and group
/// catalog entries into [`FieldSource`]s.
pub(super) fn align_field(
    cameras: &[(&SourceCatalog, &ReferenceImage)],
    config: &RegistrationConfig,
) -> FieldAlignment {
    let Some(reference_camera) = pick_reference(cameras, config.field_reference_camera) else {
        return FieldAlignment::default();
    };
    let Some(&(ref_catalog, ref_image)) = cameras.iter().find(|(c, _)| c.camera == reference_camera)
    else {
        return FieldAlignment::default();
    };

    let mut alignment = FieldAlignment {
        reference_camera: Some(reference_camera),
        ..FieldAlignment::default()
    };
    alignment
        .transforms
        .insert(reference_camera, Transform::identity());
    alignment.sources = ref_catalog
        .entries
        .iter()
        .enumerate()
        .map(|(i, e)| FieldSource {
            id: i as u32 + 1,
            pos: e.pos,
            members: vec![(reference_camera, e.id)],
        })
        .collect();

    let mut others: Vec<&(&SourceCatalog, &ReferenceImage)> = cameras
        .iter()
        .filter(|(c, _)| c.camera != reference_camera)
        .collect();
    others.sort_by_key(|(c, _)| c.camera);

    for &&(catalog, image) in &others {
        let shift = coarse_shift(&ref_image.data, &image.data, config);
        match register_catalogs(ref_catalog, catalog, shift, config) {
            Ok(reg) => {
                info!(
                    camera = %catalog.camera,
                    matched = reg.matched,
                    rms = reg.rms,
                    "camera aligned to field"
                );
                alignment.transforms.insert(catalog.camera, reg.transform);
                associate(&mut alignment.sources, catalog, &reg.transform, config);
            }
            Err(reason) => {
                warn!(camera = %catalog.camera, %reason, "camera could not be aligned to field");
                alignment.failures.push((catalog.camera, reason));
            }
        }
    }
    alignment
}

fn pick_reference(
    cameras: &[(&SourceCatalog, &ReferenceImage)],
    requested: Option<CameraId>,
) -> Option<CameraId> {
    let lowest = cameras.iter().map(|(c, _)| c.camera).min();
    match requested {
        Some(id) if cameras.iter().any(|(c, _)| c.camera == id) => Some(id),
        Some(id) => {
            warn!(camera = %id, "field reference camera not reduced, using the lowest camera id");
            lowest
        }
        None => lowest,
    }
}

/// Attach `catalog` entries to the nearest field source within the match
/// radius; unmatched entries start new field sources.
fn associate(
    sources: &mut Vec<FieldSource>,
    catalog: &SourceCatalog,
    to_field: &Transform,
    config: &RegistrationConfig,
) {
    let as_detection = |pos: Point| Detection {
        pos,
        flux: 1.0,
        peak: 0.0,
        peak_sigma: 0.0,
        npix: 0,
        shape: Shape::circular(1.0),
    };
    let field: Vec<Detection> = sources.iter().map(|s| as_detection(s.pos)).collect();
    let mapped: Vec<Detection> = catalog
        .entries
        .iter()
        .map(|e| as_detection(to_field.apply(e.pos)))
        .collect();

    let params = MatchParams {
        radius: config.match_radius,
        tie_tolerance: 0.0,
        max_flux_ratio: None,
    };
    let pairs = match_sources(&field, &mapped, Point::default(), &params);
    let mut matched = vec![false; mapped.len()];
    for pair in pairs {
        sources[pair.reference]
            .members
            .push((catalog.camera, catalog.entries[pair.target].id));
        matched[pair.target] = true;
    }

    let mut next_id = sources.iter().map(|s| s.id).max().unwrap_or(0) + 1;
    for (i, entry) in catalog.entries.iter().enumerate() {
        if !matched[i] {
            sources.push(FieldSource {
                id: next_id,
                pos: mapped[i].pos,
                members: vec![(catalog.camera, entry.id)],
            });
            next_id += 1;
        }
    }
}
