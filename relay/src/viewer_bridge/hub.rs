use base64::Engine;
use dwellcore::detection::ModelInfo;
use dwellcore::telemetry::PipelineMetrics;
use dwellcore::viewer::ViewerMessage;
use log::trace;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Broadcast point for everything pushed to viewers.
#[derive(Clone)]
pub struct ViewerHub {
    tx: broadcast::Sender<ViewerMessage>,
    hello: Arc<ViewerMessage>,
    metrics: Arc<PipelineMetrics>,
}

impl ViewerHub {
    pub fn new(capacity: usize, model: &ModelInfo, metrics: Arc<PipelineMetrics>) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            hello: Arc::new(ViewerMessage::hello(model)),
            metrics,
        }
    }

    pub fn publish(&self, message: ViewerMessage) {
        let kind = message.kind();
        // An error only means nobody is watching.
        let delivered = self.tx.send(message).unwrap_or(0);
        trace!("{} message delivered to {} viewer(s)", kind, delivered);
    }

    pub fn publish_image(&self, jpeg: &[u8]) {
        self.publish_image_base64(base64::engine::general_purpose::STANDARD.encode(jpeg));
    }

    pub fn publish_image_base64(&self, data: String) {
        self.metrics.record_image();
        self.publish(ViewerMessage::Image { data });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewerMessage> {
        self.tx.subscribe()
    }

    pub fn hello(&self) -> ViewerMessage {
        self.hello.as_ref().clone()
    }

    pub fn viewer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
