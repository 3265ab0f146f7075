//! Core detection debouncing and event recording for the dwell relay.
//!
//! The modules turn a noisy per-frame stream of labeled bounding boxes into
//! discrete "sustained presence" episodes and record exactly one event for
//! each of them.

pub mod detection;
pub mod episode;
pub mod prelude;
pub mod recorder;
pub mod telemetry;
pub mod viewer;

pub use prelude::{CoreError, CoreResult, DwellConfig};
