use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Debounce state for a single tracked label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum EpisodeState {
    /// Label absent in the previous frame.
    #[default]
    Idle,
    /// Present since `since`, not yet durably recorded. `pending` is set
    /// while a commit for this run is in flight; `retry_at` holds off the
    /// next attempt after a permanent sink failure.
    #[serde(rename_all = "camelCase")]
    Rising {
        since: DateTime<Utc>,
        attempts: u32,
        pending: bool,
        retry_at: Option<DateTime<Utc>>,
    },
    /// Present since `since` and recorded at `committed_at`.
    #[serde(rename_all = "camelCase")]
    Committed {
        since: DateTime<Utc>,
        committed_at: DateTime<Utc>,
    },
}

impl EpisodeState {
    pub(crate) fn rising(since: DateTime<Utc>) -> Self {
        EpisodeState::Rising {
            since,
            attempts: 0,
            pending: false,
            retry_at: None,
        }
    }

    pub fn presence_start_time(&self) -> Option<DateTime<Utc>> {
        match self {
            EpisodeState::Idle => None,
            EpisodeState::Rising { since, .. } | EpisodeState::Committed { since, .. } => {
                Some(*since)
            }
        }
    }

    pub fn is_continuously_present(&self) -> bool {
        !matches!(self, EpisodeState::Idle)
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, EpisodeState::Committed { .. })
    }
}

/// Request to durably record one episode.
///
/// `episode_start` identifies the run the request belongs to, so an outcome
/// that arrives after the run ended is not applied to a later one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRequest {
    pub label: String,
    pub episode_start: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

impl CommitRequest {
    pub fn new(
        label: impl Into<String>,
        episode_start: DateTime<Utc>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            label: label.into(),
            episode_start,
            occurred_at,
        }
    }
}
