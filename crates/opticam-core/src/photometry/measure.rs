use std::cell::OnceCell;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::detection::{SourceCatalog, SourceCatalogEntry};
use crate::error::Result;
use crate::frame::{CalibratedFrame, CameraId, FrameId, SourceId};
use crate::pipeline::config::{PhotometryConfig, PhotometryMethod, SensorConfig};
use crate::registration::{Point, Transform};

use super::aperture::{annulus_background, aperture_sum, frame_background, recenter, ApertureSum, SkyEstimate};
use super::psf::fit_psf;

/// Reliability annotation on a measurement. Not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityFlag {
    Ok,
    /// A pixel in the aperture reached the saturation level.
    Saturated,
    /// The aperture runs off the frame or covers masked pixels.
    Edge,
    /// flux / uncertainty below the configured threshold.
    LowSnr,
}

impl fmt::Display for QualityFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "OK",
            Self::Saturated => "SATURATED",
            Self::Edge => "EDGE",
            Self::LowSnr => "LOW_SNR",
        };
        f.write_str(s)
    }
}

/// Flux of one catalog source in one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub source: SourceId,
    pub camera: CameraId,
    pub frame: FrameId,
    /// Mid-exposure time (seconds).
    pub timestamp: f64,
    /// Position measured at, in this frame's pixel coordinates.
    pub pos: Point,
    pub flux: f64,
    pub flux_err: f64,
    /// Sky level per pixel subtracted from the flux.
    pub background: f64,
    pub flag: QualityFlag,
}

impl Measurement {
    pub fn snr(&self) -> f64 {
        if self.flux_err > 0.0 {
            self.flux / self.flux_err
        } else {
            f64::INFINITY
        }
    }
}

/// Measure every catalog source in a registered frame.
///
/// `to_reference` maps frame pixels into the catalog's reference
/// coordinates; its inverse places each source in the frame. A source whose
/// annulus has no usable pixel is measured against the frame-wide sky and
/// flagged `EDGE`. Only sources whose aperture lies off the frame or is
/// entirely masked produce no measurement.
pub fn measure_frame(
    frame: &CalibratedFrame,
    to_reference: &Transform,
    catalog: &SourceCatalog,
    config: &PhotometryConfig,
    sensor: &SensorConfig,
) -> Result<Vec<Measurement>> {
    let to_frame = to_reference.inverse()?;
    let fallback_sky = OnceCell::new();
    let measurements: Vec<Measurement> = catalog
        .entries
        .iter()
        .filter_map(|entry| {
            let predicted = to_frame.apply(entry.pos);
            let m = measure_source(frame, entry, predicted, config, sensor, &fallback_sky);
            if m.is_none() {
                trace!(frame = %frame.id, source = %entry.id, "source not measurable in frame");
            }
            m
        })
        .collect();
    Ok(measurements)
}

fn measure_source(
    frame: &CalibratedFrame,
    entry: &SourceCatalogEntry,
    predicted: Point,
    config: &PhotometryConfig,
    sensor: &SensorConfig,
    fallback_sky: &OnceCell<Option<SkyEstimate>>,
) -> Option<Measurement> {
    let radius = entry.aperture_radius;
    let (h, w) = frame.data.dim();
    let off_frame = predicted.x < -radius
        || predicted.y < -radius
        || predicted.x > w as f64 - 1.0 + radius
        || predicted.y > h as f64 - 1.0 + radius;
    if off_frame {
        return None;
    }

    let (sky, local_sky) = match annulus_background(frame, predicted, &config.annulus) {
        Some(sky) => (sky, true),
        None => {
            debug!(frame = %frame.id, source = %entry.id, "empty sky annulus, using frame background");
            (fallback_sky.get_or_init(|| frame_background(frame)).as_ref().copied()?, false)
        }
    };
    let saturation = sensor.saturation_level;

    let aperture = |pos: Point| -> Option<(f64, f64, ApertureSum)> {
        let sum = aperture_sum(frame, pos, radius, saturation);
        if sum.count == 0 {
            return None;
        }
        let n = sum.count as f64;
        let flux = sum.sum - n * sky.level;
        Some((flux, aperture_error(flux, n, &sky, sensor), sum))
    };

    let (pos, flux, flux_err, complete, saturated) = match &config.method {
        PhotometryMethod::Aperture { recenter: enabled, .. } => {
            let pos = if *enabled {
                recenter(frame, predicted, radius, sky.level, config.max_offset)
            } else {
                predicted
            };
            let (flux, flux_err, sum) = aperture(pos)?;
            (pos, flux, flux_err, sum.is_complete(), sum.saturated)
        }
        PhotometryMethod::Psf { .. } => match fit_psf(
            frame,
            predicted,
            &entry.shape,
            &sky,
            radius,
            config.max_offset,
            sensor,
            saturation,
        ) {
            Some(fit) => (
                fit.centre,
                fit.flux,
                fit.flux_err,
                fit.outside == 0 && fit.invalid == 0,
                fit.saturated,
            ),
            None => {
                // Too few clean pixels to fit: sum what is there instead.
                debug!(frame = %frame.id, source = %entry.id, "PSF fit failed, using aperture sum");
                let (flux, flux_err, sum) = aperture(predicted)?;
                (predicted, flux, flux_err, false, sum.saturated)
            }
        },
    };

    let snr = if flux_err > 0.0 { flux / flux_err } else { f64::INFINITY };
    let flag = if saturated {
        QualityFlag::Saturated
    } else if !complete || !local_sky || sky.is_sparse() {
        QualityFlag::Edge
    } else if snr < config.min_snr {
        QualityFlag::LowSnr
    } else {
        QualityFlag::Ok
    };

    Some(Measurement {
        source: entry.id,
        camera: frame.camera,
        frame: frame.id,
        timestamp: frame.timestamp,
        pos,
        flux,
        flux_err,
        background: sky.level,
        flag,
    })
}

/// Shot noise, sky noise over the aperture, the error of the sky level
/// itself, and read noise, added in quadrature (ADU).
fn aperture_error(flux: f64, n: f64, sky: &SkyEstimate, sensor: &SensorConfig) -> f64 {
    let read_var = sensor.read_noise * sensor.read_noise;
    let sky_var = (sky.variance - read_var).max(0.0);
    let n_sky = sky.count.max(1) as f64;
    let shot = flux.max(0.0) / sensor.gain;
    (shot + n * (sky_var + read_var) + n * n * (sky_var + read_var) / n_sky).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_display_matches_serde() {
        for flag in [
            QualityFlag::Ok,
            QualityFlag::Saturated,
            QualityFlag::Edge,
            QualityFlag::LowSnr,
        ] {
            let json = serde_json::to_string(&flag).unwrap();
            assert_eq!(json, format!("\"{flag}\""));
        }
    }

    #[test]
    fn test_aperture_error_terms() {
        let sky = SkyEstimate {
            level: 100.0,
            variance: 25.0,
            count: 100,
        };
        let sensor = SensorConfig {
            gain: 2.0,
            read_noise: 3.0,
            ..SensorConfig::default()
        };
        // shot 1000/2 = 500; per-pixel 16 + 9 = 25; 10 px -> 250; sky-level term 100*25/100 = 25
        let err = aperture_error(1000.0, 10.0, &sky, &sensor);
        assert!((err - 775.0f64.sqrt()).abs() < 1e-9);
    }
}
