pub mod aperture;
pub mod measure;
pub mod psf;

pub use aperture::{annulus_background, aperture_sum, frame_background, recenter, ApertureSum, SkyEstimate};
pub use measure::{measure_frame, Measurement, QualityFlag};
pub use psf::{fit_psf, PsfFit};
