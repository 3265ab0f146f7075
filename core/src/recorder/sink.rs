use crate::recorder::record::{DetectionRecord, NewDetectionRecord};
use chrono::Utc;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Failure reported by a persistence sink.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct SinkError {
    pub transient: bool,
    pub message: String,
}

impl SinkError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            transient: true,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            transient: false,
            message: message.into(),
        }
    }
}

/// Append-only store for detection events.
pub trait RecordSink: Send + Sync + 'static {
    fn insert(
        &self,
        record: NewDetectionRecord,
    ) -> impl Future<Output = Result<DetectionRecord, SinkError>> + Send;

    fn describe(&self) -> String;
}

/// In-process sink with scripted failures and latency.
#[derive(Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    records: Vec<DetectionRecord>,
    failures: VecDeque<SinkError>,
    delay: Option<Duration>,
    attempts: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `count` transient failures ahead of any successful insert.
    pub fn fail_next(&self, count: usize) {
        if let Ok(mut state) = self.inner.lock() {
            for _ in 0..count {
                state
                    .failures
                    .push_back(SinkError::transient("scripted failure"));
            }
        }
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        if let Ok(mut state) = self.inner.lock() {
            state.delay = delay;
        }
    }

    pub fn records(&self) -> Vec<DetectionRecord> {
        self.inner
            .lock()
            .map(|state| state.records.clone())
            .unwrap_or_default()
    }

    pub fn attempts(&self) -> usize {
        self.inner.lock().map(|state| state.attempts).unwrap_or(0)
    }
}

impl RecordSink for MemorySink {
    async fn insert(&self, record: NewDetectionRecord) -> Result<DetectionRecord, SinkError> {
        let delay = self
            .inner
            .lock()
            .map_err(|_| SinkError::permanent("memory sink poisoned"))?
            .delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self
            .inner
            .lock()
            .map_err(|_| SinkError::permanent("memory sink poisoned"))?;
        state.attempts += 1;
        if let Some(failure) = state.failures.pop_front() {
            return Err(failure);
        }
        let stored = DetectionRecord {
            id: record.id,
            created_at: Utc::now(),
            action: record.action,
        };
        state.records.push(stored.clone());
        Ok(stored)
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn new_record() -> NewDetectionRecord {
        NewDetectionRecord {
            id: Uuid::new_v4(),
            action: "coffee-cup detected".into(),
        }
    }

    #[tokio::test]
    async fn memory_sink_stores_after_scripted_failures() {
        let sink = MemorySink::new();
        sink.fail_next(1);

        let err = sink.insert(new_record()).await.unwrap_err();
        assert!(err.transient);
        assert!(sink.records().is_empty());

        let stored = sink.insert(new_record()).await.unwrap();
        assert_eq!(stored.action, "coffee-cup detected");
        assert_eq!(sink.records(), vec![stored]);
        assert_eq!(sink.attempts(), 2);
    }
}
