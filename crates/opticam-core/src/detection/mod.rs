pub mod background;
pub mod catalog;
pub mod config;
pub mod deblend;
pub mod detector;
pub mod segments;
pub mod smoothing;
pub mod stack;

pub use background::{estimate_background, BackgroundMap};
pub use catalog::{build_catalog, SourceCatalog, SourceCatalogEntry};
pub use config::{Connectivity, DetectionConfig};
pub use deblend::{deblend_segment, DeblendConfig, LevelSpacing};
pub use detector::{detect_sources, Detection, Shape};
pub use stack::{stack_registered, ReferenceImage};
