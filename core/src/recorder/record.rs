use crate::episode::CommitRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Row handed to a sink; `created_at` is assigned by the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDetectionRecord {
    pub id: Uuid,
    pub action: String,
}

impl NewDetectionRecord {
    pub fn for_request(request: &CommitRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            action: format!("{} detected", request.label),
        }
    }
}

/// Persisted, append-only detection event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub action: String,
}
