pub mod apply;
pub mod combine;
pub mod master;

pub use apply::calibrate_frame;
pub use combine::{combine_arrays, CombineMethod, SigmaClipParams};
pub use master::{
    build_calibration_set, build_master, CalibrationSet, MasterBuild, MasterCalibration,
    RejectedFrame,
};
