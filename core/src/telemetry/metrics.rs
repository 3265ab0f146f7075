use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Counters shared between the pipeline task and the status endpoint.
pub struct PipelineMetrics {
    inner: Mutex<MetricsSnapshot>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub frames: u64,
    pub images: u64,
    pub commits_requested: u64,
    pub commits_acknowledged: u64,
    pub commits_failed: u64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsSnapshot::default()),
        }
    }

    fn update(&self, apply: impl FnOnce(&mut MetricsSnapshot)) {
        if let Ok(mut metrics) = self.inner.lock() {
            apply(&mut metrics);
        }
    }

    pub fn record_frame(&self) {
        self.update(|m| m.frames += 1);
    }

    pub fn record_image(&self) {
        self.update(|m| m.images += 1);
    }

    pub fn record_commit_requested(&self) {
        self.update(|m| m.commits_requested += 1);
    }

    pub fn record_commit_acknowledged(&self) {
        self.update(|m| m.commits_acknowledged += 1);
    }

    pub fn record_commit_failed(&self) {
        self.update(|m| m.commits_failed += 1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        if let Ok(metrics) = self.inner.lock() {
            *metrics
        } else {
            MetricsSnapshot::default()
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
