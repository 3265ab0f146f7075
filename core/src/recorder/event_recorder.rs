use crate::episode::CommitRequest;
use crate::prelude::DwellConfig;
use crate::recorder::record::{DetectionRecord, NewDetectionRecord};
use crate::recorder::sink::{RecordSink, SinkError};
use crate::telemetry::log::LogManager;
use std::time::Duration;

/// Confirmation that an episode was durably recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub record: DetectionRecord,
}

/// A commit attempt that did not reach durable storage.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("recording {label} failed: {message}")]
pub struct RecordError {
    pub label: String,
    pub transient: bool,
    pub message: String,
}

impl RecordError {
    fn from_sink(label: &str, err: SinkError) -> Self {
        Self {
            label: label.to_string(),
            transient: err.transient,
            message: err.message,
        }
    }

    fn timed_out(label: &str, timeout: Duration) -> Self {
        Self {
            label: label.to_string(),
            transient: true,
            message: format!("no response within {} ms", timeout.as_millis()),
        }
    }
}

/// Writes one record per commit request, bounded by a timeout.
///
/// There is no retry loop here; retries come from the tracker re-emitting the
/// request on later frames.
pub struct EventRecorder<S> {
    sink: S,
    timeout: Duration,
    logger: LogManager,
}

impl<S: RecordSink> EventRecorder<S> {
    pub fn new(sink: S, config: &DwellConfig) -> Self {
        Self {
            sink,
            timeout: Duration::from_millis(config.commit_timeout_ms),
            logger: LogManager::new("recorder"),
        }
    }

    pub async fn commit(&self, request: &CommitRequest) -> Result<Ack, RecordError> {
        let record = NewDetectionRecord::for_request(request);
        let id = record.id;
        match tokio::time::timeout(self.timeout, self.sink.insert(record)).await {
            Ok(Ok(stored)) => {
                self.logger.record(&format!(
                    "recorded {} as {} in {}",
                    request.label,
                    id,
                    self.sink.describe()
                ));
                Ok(Ack { record: stored })
            }
            Ok(Err(err)) => {
                let err = RecordError::from_sink(&request.label, err);
                self.logger.warn(&err.to_string());
                Err(err)
            }
            Err(_) => {
                let err = RecordError::timed_out(&request.label, self.timeout);
                self.logger.warn(&err.to_string());
                Err(err)
            }
        }
    }
}
