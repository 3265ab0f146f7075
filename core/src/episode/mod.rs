pub mod state;
pub mod tracker;

pub use state::{CommitRequest, EpisodeState};
pub use tracker::EpisodeTracker;
