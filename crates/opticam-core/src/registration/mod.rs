pub mod matching;
pub mod phase_correlation;
pub mod register;
pub mod transform;

pub use matching::{match_sources, MatchParams, SourcePair};
pub use phase_correlation::estimate_shift;
pub use register::{
    coarse_shift, register_catalogs, register_sources, registration_sources, select_reference,
    Registration,
};
pub use transform::{Point, Transform};
