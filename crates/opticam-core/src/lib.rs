pub mod error;
pub mod consts;
pub mod frame;
pub mod stats;
pub mod calibration;
pub mod registration;
pub mod detection;
pub mod photometry;
pub mod lightcurve;
pub mod differential;
pub mod pipeline;
pub mod sim;
