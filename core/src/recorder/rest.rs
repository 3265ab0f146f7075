use crate::prelude::{CoreError, CoreResult};
use crate::recorder::record::{DetectionRecord, NewDetectionRecord};
use crate::recorder::sink::{RecordSink, SinkError};
use log::debug;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection settings for a PostgREST-style table endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestSinkConfig {
    pub url: String,
    pub key: String,
    pub table: String,
    pub timeout_ms: u64,
}

/// Inserts records over HTTP and reads back the server-assigned row.
pub struct RestSink {
    client: reqwest::Client,
    endpoint: String,
    key: String,
}

impl RestSink {
    pub fn new(config: &RestSinkConfig) -> CoreResult<Self> {
        if config.url.trim().is_empty() || config.key.trim().is_empty() {
            return Err(CoreError::InvalidConfig(
                "rest sink requires both a url and a key".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.max(1)))
            .build()
            .map_err(|err| CoreError::Sink(format!("building http client: {}", err)))?;
        let endpoint = format!(
            "{}/rest/v1/{}",
            config.url.trim_end_matches('/'),
            config.table
        );
        Ok(Self {
            client,
            endpoint,
            key: config.key.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

impl RecordSink for RestSink {
    async fn insert(&self, record: NewDetectionRecord) -> Result<DetectionRecord, SinkError> {
        debug!("POST {} id={}", self.endpoint, record.id);
        let response = self
            .client
            .post(&self.endpoint)
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
            .header("Prefer", "return=representation")
            .json(&record)
            .send()
            .await
            .map_err(|err| SinkError::transient(format!("insert request failed: {}", err)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            let message = format!("insert returned {}: {}", status, body);
            return Err(if is_transient_status(status) {
                SinkError::transient(message)
            } else {
                SinkError::permanent(message)
            });
        }

        let mut rows: Vec<DetectionRecord> = response
            .json()
            .await
            .map_err(|err| SinkError::permanent(format!("parsing insert response: {}", err)))?;
        rows.pop()
            .ok_or_else(|| SinkError::permanent("insert returned no rows"))
    }

    fn describe(&self) -> String {
        format!("rest {}", self.endpoint)
    }
}
