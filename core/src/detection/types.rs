use crate::prelude::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Frame-relative region reported by the inference collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// One observed object instance in one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    #[serde(alias = "value")]
    pub confidence: f32,
    #[serde(flatten)]
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }
}

/// Raw output of one inference pass over a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    #[serde(default, alias = "boundingBoxes", alias = "bounding_boxes")]
    pub detections: Vec<Detection>,
    #[serde(default)]
    pub timing_ms: u64,
}

/// Per-frame view holding at most one detection per label, all above threshold.
///
/// Only [`DetectionFilter`](super::DetectionFilter) builds these, so the
/// invariants hold for every instance.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(transparent)]
pub struct FilteredDetectionSet {
    detections: Vec<Detection>,
}

impl FilteredDetectionSet {
    pub(crate) fn from_unique(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    pub fn contains(&self, label: &str) -> bool {
        self.detections.iter().any(|d| d.label == label)
    }

    pub fn get(&self, label: &str) -> Option<&Detection> {
        self.detections.iter().find(|d| d.label == label)
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Detection> {
        self.detections.iter()
    }
}

/// Static metadata describing the deployed model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub project_id: u64,
    pub project_name: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub input_width: u32,
    #[serde(default)]
    pub input_height: u32,
}

impl ModelInfo {
    pub fn load<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref).map_err(|err| {
            CoreError::InvalidConfig(format!(
                "reading model metadata {}: {}",
                path_ref.display(),
                err
            ))
        })?;
        serde_json::from_str(&contents).map_err(|err| {
            CoreError::InvalidConfig(format!(
                "parsing model metadata {}: {}",
                path_ref.display(),
                err
            ))
        })
    }

    pub fn knows_label(&self, label: &str) -> bool {
        self.labels.iter().any(|known| known == label)
    }
}
