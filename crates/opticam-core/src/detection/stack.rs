use ndarray::Array2;
use rayon::prelude::*;
use tracing::debug;

use crate::calibration::{combine_arrays, CombineMethod};
use crate::error::{ReductionError, Result};
use crate::frame::{mask, CalibratedFrame, CameraId, FrameId};
use crate::registration::{Point, Transform};

/// Deep image of one camera's field in reference-frame pixel coordinates.
#[derive(Clone, Debug)]
pub struct ReferenceImage {
    pub camera: CameraId,
    pub data: Array2<f32>,
    /// Non-zero where no frame contributed a usable value.
    pub mask: Array2<u8>,
    pub frames: Vec<FrameId>,
}

/// Resample registered frames onto the reference grid and combine them.
///
/// Each transform maps that frame's pixels into reference coordinates.
/// Masked pixels and positions outside a frame contribute nothing.
pub fn stack_registered(
    camera: CameraId,
    frames: &[(&CalibratedFrame, Transform)],
    method: &CombineMethod,
) -> Result<ReferenceImage> {
    let Some((first, _)) = frames.first() else {
        return Err(ReductionError::EmptySequence);
    };
    let dim = first.data.dim();

    let resampled: Vec<Array2<f32>> = frames
        .par_iter()
        .map(|(frame, transform)| {
            let to_frame = transform.inverse()?;
            let mut source = frame.data.clone();
            for (v, &m) in source.iter_mut().zip(frame.mask.iter()) {
                if m != 0 {
                    *v = f32::NAN;
                }
            }
            Ok(Array2::from_shape_fn(dim, |(row, col)| {
                let p = to_frame.apply(Point::new(col as f64, row as f64));
                bilinear_sample(&source, p.y, p.x)
            }))
        })
        .collect::<Result<_>>()?;

    let views: Vec<&Array2<f32>> = resampled.iter().collect();
    let data = combine_arrays(&views, method)?;
    let mask = data.mapv(|v| if v.is_finite() { 0 } else { mask::NON_FINITE });
    debug!(%camera, frames = frames.len(), "reference stack built");

    Ok(ReferenceImage {
        camera,
        data,
        mask,
        frames: frames.iter().map(|(f, _)| f.id).collect(),
    })
}

/// Bilinear interpolation; NaN when any contributing neighbour is outside
/// the array or non-finite.
fn bilinear_sample(data: &Array2<f32>, y: f64, x: f64) -> f32 {
    let (h, w) = data.dim();
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = (x - x0) as f32;
    let fy = (y - y0) as f32;
    let (x0, y0) = (x0 as i64, y0 as i64);

    let mut acc = 0.0f32;
    for (dy, wy) in [(0i64, 1.0 - fy), (1, fy)] {
        for (dx, wx) in [(0i64, 1.0 - fx), (1, fx)] {
            let weight = wy * wx;
            if weight == 0.0 {
                continue;
            }
            let (r, c) = (y0 + dy, x0 + dx);
            if r < 0 || c < 0 || r >= h as i64 || c >= w as i64 {
                return f32::NAN;
            }
            acc += data[[r as usize, c as usize]] * weight;
        }
    }
    acc
}
