pub mod assembler;
pub mod gaps;

pub use assembler::{assemble, Assembly, DroppedMeasurement, LightCurve, LightCurveAssembler};
pub use gaps::{find_gaps, median_cadence, Gap};
