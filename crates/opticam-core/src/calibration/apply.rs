use ndarray::{Array2, Zip};

use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::error::{ReductionError, Result};
use crate::frame::{mask, CalibratedFrame, FrameKind, RawFrame};
use crate::pipeline::config::{CalibrationConfig, SensorConfig};

use super::master::{dark_scale, CalibrationSet};

/// Apply a camera's masters to one raw science frame.
///
/// `(raw - bias - dark * t_frame / t_dark) / flat`. Pixels with a flat response
/// below `flat_epsilon`, results below `-negative_limit`, saturated raw values
/// and non-finite inputs are flagged in the mask. Masked pixels are set to 0.0
/// except saturated ones, which keep their calibrated value so photometry can
/// still see them.
pub fn calibrate_frame(
    raw: &RawFrame,
    masters: &CalibrationSet,
    config: &CalibrationConfig,
    sensor: &SensorConfig,
) -> Result<CalibratedFrame> {
    if raw.camera != masters.camera {
        return Err(ReductionError::CalibrationMismatch {
            frame: raw.id,
            detail: format!("frame is from {}, masters from {}", raw.camera, masters.camera),
        });
    }
    if raw.kind != FrameKind::Science {
        return Err(ReductionError::CalibrationMismatch {
            frame: raw.id,
            detail: format!("expected a science frame, got {}", raw.kind),
        });
    }
    let expected = masters.dim();
    for (name, dim) in [
        ("raw frame", raw.data.dim()),
        ("master dark", masters.dark.data.dim()),
        ("master flat", masters.flat.data.dim()),
    ] {
        if dim != expected {
            return Err(ReductionError::CalibrationMismatch {
                frame: raw.id,
                detail: format!("{name} is {dim:?}, master bias is {expected:?}"),
            });
        }
    }

    let scale = dark_scale(raw.exposure, masters.dark.exposure);
    let flat_epsilon = config.flat_epsilon;
    let negative_limit = config.negative_limit;
    let saturation = sensor.saturation_level;

    let mut data = Array2::<f32>::zeros(expected);
    let mut flags = Array2::<u8>::zeros(expected);

    let zip = Zip::from(&mut data)
        .and(&mut flags)
        .and(&raw.data)
        .and(&masters.bias.data)
        .and(&masters.dark.data)
        .and(&masters.flat.data);
    let kernel = |out: &mut f32, flag: &mut u8, &r: &f32, &b: &f32, &d: &f32, &f: &f32| {
        let (value, bits) = calibrate_pixel(r, b, d * scale, f, flat_epsilon, negative_limit, saturation);
        *out = value;
        *flag = bits;
    };
    if expected.0 * expected.1 >= PARALLEL_PIXEL_THRESHOLD {
        zip.par_for_each(kernel);
    } else {
        zip.for_each(kernel);
    }

    Ok(CalibratedFrame {
        id: raw.id,
        camera: raw.camera,
        timestamp: raw.timestamp,
        exposure: raw.exposure,
        data,
        mask: flags,
    })
}

fn calibrate_pixel(
    raw: f32,
    bias: f32,
    dark: f32,
    flat: f32,
    flat_epsilon: f32,
    negative_limit: f32,
    saturation: f32,
) -> (f32, u8) {
    if !(raw.is_finite() && bias.is_finite() && dark.is_finite() && flat.is_finite()) {
        return (0.0, mask::NON_FINITE);
    }
    if flat < flat_epsilon {
        return (0.0, mask::LOW_FLAT);
    }
    let value = (raw - bias - dark) / flat;
    if raw >= saturation {
        return (value, mask::SATURATED);
    }
    if value < -negative_limit {
        return (0.0, mask::NEGATIVE);
    }
    (value, 0)
}
