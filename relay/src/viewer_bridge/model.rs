use dwellcore::episode::EpisodeState;
use dwellcore::recorder::DetectionRecord;
use dwellcore::telemetry::{MetricsSnapshot, PipelineMetrics};
use dwellcore::viewer::ClassificationPayload;
use serde::Serialize;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Serialize)]
pub struct EpisodeView {
    pub label: String,
    #[serde(flatten)]
    pub state: EpisodeState,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatusModel {
    pub sink: String,
    pub viewers: usize,
    pub episodes: Vec<EpisodeView>,
    pub last_classification: Option<ClassificationPayload>,
    pub last_record: Option<DetectionRecord>,
    pub metrics: MetricsSnapshot,
}

/// Latest pipeline view served by `GET /status`.
pub struct StatusBoard {
    model: RwLock<StatusModel>,
    metrics: Arc<PipelineMetrics>,
}

impl StatusBoard {
    pub fn new(metrics: Arc<PipelineMetrics>, sink: String) -> Self {
        Self {
            model: RwLock::new(StatusModel {
                sink,
                ..Default::default()
            }),
            metrics,
        }
    }

    pub fn set_episodes(&self, episodes: Vec<(String, EpisodeState)>) {
        if let Ok(mut guard) = self.model.write() {
            guard.episodes = episodes
                .into_iter()
                .map(|(label, state)| EpisodeView { label, state })
                .collect();
        }
    }

    pub fn set_last_classification(&self, payload: ClassificationPayload) {
        if let Ok(mut guard) = self.model.write() {
            guard.last_classification = Some(payload);
        }
    }

    pub fn set_last_record(&self, record: DetectionRecord) {
        if let Ok(mut guard) = self.model.write() {
            guard.last_record = Some(record);
        }
    }

    pub fn snapshot(&self, viewers: usize) -> StatusModel {
        let mut model = self
            .model
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_default();
        model.viewers = viewers;
        model.metrics = self.metrics.snapshot();
        model
    }
}
