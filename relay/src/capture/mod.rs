//! Capture sources that feed the relay when frames are not pushed over HTTP.

pub mod replay;

pub use replay::ReplaySource;
