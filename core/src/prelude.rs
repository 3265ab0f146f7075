use serde::{Deserialize, Serialize};

/// Minimum confidence a detection needs to count as present.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.75;
/// Continuous presence required before an episode is recorded.
pub const DEFAULT_DEBOUNCE_MS: u64 = 3000;
/// Upper bound on a single persistence attempt.
pub const DEFAULT_COMMIT_TIMEOUT_MS: u64 = 5000;

/// Shared configuration for the filter, tracker and recorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DwellConfig {
    pub confidence_threshold: f32,
    pub debounce_ms: u64,
    pub tracked_labels: Vec<String>,
    pub commit_timeout_ms: u64,
}

impl Default for DwellConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            tracked_labels: vec!["coffee-cup".to_string()],
            commit_timeout_ms: DEFAULT_COMMIT_TIMEOUT_MS,
        }
    }
}

impl DwellConfig {
    pub fn validate(&self) -> CoreResult<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(CoreError::InvalidConfig(format!(
                "confidence_threshold {} outside [0, 1]",
                self.confidence_threshold
            )));
        }
        if self.debounce_ms == 0 {
            return Err(CoreError::InvalidConfig(
                "debounce_ms must be greater than zero".into(),
            ));
        }
        if self.tracked_labels.is_empty() {
            return Err(CoreError::InvalidConfig(
                "at least one tracked label is required".into(),
            ));
        }
        if self.tracked_labels.iter().any(|label| label.trim().is_empty()) {
            return Err(CoreError::InvalidConfig(
                "tracked labels must not be blank".into(),
            ));
        }
        if self.commit_timeout_ms == 0 {
            return Err(CoreError::InvalidConfig(
                "commit_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Common error type for the core crate.
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("sink failure: {0}")]
    Sink(String),
    #[error("internal failure: {0}")]
    Internal(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
