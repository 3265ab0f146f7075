use crate::detection::{Detection, FilteredDetectionSet, ModelInfo};
use serde::{Deserialize, Serialize};

/// Payload of a `classification` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationPayload {
    pub detections: Vec<Detection>,
}

/// Messages pushed to connected viewers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ViewerMessage {
    #[serde(rename_all = "camelCase")]
    Hello {
        project_id: u64,
        project_name: String,
        owner: String,
        labels: Vec<String>,
    },
    Image {
        data: String,
    },
    #[serde(rename_all = "camelCase")]
    Classification {
        result: ClassificationPayload,
        time_ms: u64,
    },
}

impl ViewerMessage {
    pub fn hello(model: &ModelInfo) -> Self {
        ViewerMessage::Hello {
            project_id: model.project_id,
            project_name: model.project_name.clone(),
            owner: model.owner.clone(),
            labels: model.labels.clone(),
        }
    }

    pub fn classification(detections: &FilteredDetectionSet, time_ms: u64) -> Self {
        ViewerMessage::Classification {
            result: ClassificationPayload {
                detections: detections.iter().cloned().collect(),
            },
            time_ms,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ViewerMessage::Hello { .. } => "hello",
            ViewerMessage::Image { .. } => "image",
            ViewerMessage::Classification { .. } => "classification",
        }
    }
}
