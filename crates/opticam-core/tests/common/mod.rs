#![allow(dead_code)]

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use opticam_core::detection::{Shape, SourceCatalog, SourceCatalogEntry};
use opticam_core::frame::{CalibratedFrame, CameraId, FrameId, FrameKind, RawFrame, SourceId};
use opticam_core::photometry::{Measurement, QualityFlag};
use opticam_core::registration::Point;

/// A star with integrated counts `flux` and circular width `sigma`.
#[derive(Clone, Copy, Debug)]
pub struct Star {
    pub x: f64,
    pub y: f64,
    pub flux: f64,
    pub sigma: f64,
}

impl Star {
    pub fn new(x: f64, y: f64, flux: f64, sigma: f64) -> Self {
        Self { x, y, flux, sigma }
    }

    pub fn pos(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// Noiseless image: flat `background` plus each star's Gaussian profile.
pub fn star_field(height: usize, width: usize, background: f64, stars: &[Star]) -> Array2<f32> {
    Array2::from_shape_fn((height, width), |(r, c)| {
        let mut v = background;
        for s in stars {
            let dx = c as f64 - s.x;
            let dy = r as f64 - s.y;
            let peak = s.flux / (std::f64::consts::TAU * s.sigma * s.sigma);
            v += peak * (-(dx * dx + dy * dy) / (2.0 * s.sigma * s.sigma)).exp();
        }
        v as f32
    })
}

/// Add seeded Gaussian noise of standard deviation `sigma`.
pub fn add_noise(data: &mut Array2<f32>, sigma: f64, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, sigma).unwrap();
    data.mapv_inplace(|v| v + normal.sample(&mut rng) as f32);
}

/// Add per-pixel Gaussian noise with Poisson variance (`value`) plus `read_noise²`.
pub fn add_shot_noise(data: &mut Array2<f32>, read_noise: f64, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let unit = Normal::new(0.0, 1.0).unwrap();
    data.mapv_inplace(|v| {
        let sigma = (v.max(0.0) as f64 + read_noise * read_noise).sqrt();
        v + (sigma * unit.sample(&mut rng)) as f32
    });
}

pub fn raw(id: u64, camera: u8, kind: FrameKind, exposure: f64, data: Array2<f32>) -> RawFrame {
    RawFrame::new(FrameId(id), CameraId(camera), kind, id as f64, exposure, data)
}

pub fn uniform_raw(id: u64, camera: u8, kind: FrameKind, value: f32, exposure: f64, dim: (usize, usize)) -> RawFrame {
    raw(id, camera, kind, exposure, Array2::from_elem(dim, value))
}

pub fn calibrated(id: u64, camera: u8, data: Array2<f32>) -> CalibratedFrame {
    CalibratedFrame::from_data(FrameId(id), CameraId(camera), id as f64, data)
}

/// Single-camera catalog with one entry per position, numbered from 1.
pub fn catalog(camera: u8, positions: &[Point], radius: f64, sigma: f64) -> SourceCatalog {
    SourceCatalog {
        camera: CameraId(camera),
        stacked_frames: vec![FrameId(0)],
        entries: positions
            .iter()
            .enumerate()
            .map(|(i, &pos)| SourceCatalogEntry {
                id: SourceId(i as u32 + 1),
                camera: CameraId(camera),
                pos,
                flux: 1000.0,
                peak_sigma: 50.0,
                shape: Shape::circular(sigma),
                aperture_radius: radius,
            })
            .collect(),
    }
}

pub fn measurement(camera: u8, source: u32, frame: u64, timestamp: f64, flux: f64) -> Measurement {
    Measurement {
        source: SourceId(source),
        camera: CameraId(camera),
        frame: FrameId(frame),
        timestamp,
        pos: Point::new(10.0, 10.0),
        flux,
        flux_err: flux.abs().sqrt().max(1.0),
        background: 0.0,
        flag: QualityFlag::Ok,
    }
}

/// Nearest detection distance for `target` among `found`.
pub fn nearest(found: &[Point], target: Point) -> f64 {
    found
        .iter()
        .map(|p| p.distance(&target))
        .fold(f64::INFINITY, f64::min)
}
