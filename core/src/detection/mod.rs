pub mod filter;
pub mod types;

pub use filter::{filter_detections, DetectionFilter};
pub use types::{BoundingBox, Classification, Detection, FilteredDetectionSet, ModelInfo};
