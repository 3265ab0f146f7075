use crate::detection::types::{Detection, FilteredDetectionSet};
use crate::prelude::DEFAULT_CONFIDENCE_THRESHOLD;
use log::trace;

/// Confidence gate and label de-duplication applied to every frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionFilter {
    threshold: f32,
}

impl DetectionFilter {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn apply(&self, raw: &[Detection]) -> FilteredDetectionSet {
        filter_detections(raw, self.threshold)
    }
}

impl Default for DetectionFilter {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

/// Drops detections below `threshold`, then keeps the first detection seen
/// for each label in arrival order.
pub fn filter_detections(raw: &[Detection], threshold: f32) -> FilteredDetectionSet {
    let mut kept: Vec<Detection> = Vec::with_capacity(raw.len());
    for detection in raw {
        if detection.confidence < threshold {
            continue;
        }
        if kept.iter().any(|existing| existing.label == detection.label) {
            continue;
        }
        kept.push(detection.clone());
    }
    trace!("filter kept {} of {} detections", kept.len(), raw.len());
    FilteredDetectionSet::from_unique(kept)
}
