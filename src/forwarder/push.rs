//! Loki push payload construction and HTTP transport
//!
//! Records are grouped into streams by their label tuple; each stream
//! carries `[<ns timestamp>, <line JSON>]` value pairs as required by
//! the Loki push API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use crate::error::GatewayError;

/// Downstream push configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownstreamConfig {
    /// Loki base URL
    pub base_url: String,
    pub push_endpoint: String,
    pub timeout_seconds: u64,
    /// Retries after the first attempt
    pub max_retries: usize,
    /// Backoff before retry i is `backoff_seconds[min(i, len-1)]`
    pub backoff_seconds: Vec<u64>,
    /// Sleep after the final failed retry before abandoning a segment
    pub backoff_park_seconds: u64,
    /// Maximum entries per downstream POST
    pub batch_max_entries: usize,
    /// Maximum payload entry bytes per downstream POST
    pub batch_max_bytes: usize,
    /// Scheduler interval between forwarder cycles
    pub forward_interval_seconds: u64,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3100".to_string(),
            push_endpoint: "/loki/api/v1/push".to_string(),
            timeout_seconds: 30,
            max_retries: 3,
            backoff_seconds: vec![5, 10, 20],
            backoff_park_seconds: 60,
            batch_max_entries: 1000,
            batch_max_bytes: 1_048_576,
            forward_interval_seconds: 30,
        }
    }
}

impl DownstreamConfig {
    pub fn push_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.push_endpoint)
    }

    /// Loki's readiness endpoint, probed by the health checker.
    pub fn ready_url(&self) -> String {
        format!("{}/ready", self.base_url.trim_end_matches('/'))
    }
}

/// One Loki stream: a label set plus timestamped log lines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PushStream {
    pub stream: BTreeMap<String, String>,
    /// `[<ns since epoch as decimal string>, <line JSON>]` pairs
    pub values: Vec<(String, String)>,
}

/// Body of a push POST.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PushPayload {
    pub streams: Vec<PushStream>,
}

impl PushPayload {
    pub fn entry_count(&self) -> usize {
        self.streams.iter().map(|s| s.values.len()).sum()
    }
}

/// Push transport failure, classified by the forwarder's retry policy.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// Non-2xx response from the downstream
    #[error("downstream returned status {status}")]
    Status { status: u16 },
    /// Connection, DNS, or timeout failure
    #[error("downstream transport error: {0}")]
    Transport(String),
}

/// Transport seam over the push POST so the forwarder is testable
/// without a network.
#[async_trait]
pub trait PushClient: Send + Sync {
    async fn push(&self, payload: &PushPayload) -> Result<(), PushError>;
}

/// Production client for a Loki-compatible push endpoint.
pub struct LokiClient {
    client: reqwest::Client,
    push_url: String,
}

impl LokiClient {
    pub fn new(config: &DownstreamConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| GatewayError::Config(format!("cannot build push client: {e}")))?;
        Ok(Self {
            client,
            push_url: config.push_url(),
        })
    }
}

#[async_trait]
impl PushClient for LokiClient {
    async fn push(&self, payload: &PushPayload) -> Result<(), PushError> {
        let response = self
            .client
            .post(&self.push_url)
            .json(payload)
            .send()
            .await
            .map_err(|e| PushError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(status = status.as_u16(), "push accepted");
            Ok(())
        } else {
            Err(PushError::Status {
                status: status.as_u16(),
            })
        }
    }
}

/// Group scanned records into Loki streams.
///
/// The stream key is `(service, env, level)` plus any keys from the
/// record's `labels` map; the line carries message, metadata and trace
/// context. An unparseable record timestamp falls back to wall-clock now.
pub fn build_payload(records: &[Value]) -> PushPayload {
    let mut groups: BTreeMap<BTreeMap<String, String>, Vec<(String, String)>> = BTreeMap::new();

    for record in records {
        let labels = stream_labels(record);
        let ns = record_timestamp_nanos(record);
        let line = log_line(record);
        groups.entry(labels).or_default().push((ns.to_string(), line));
    }

    PushPayload {
        streams: groups
            .into_iter()
            .map(|(stream, values)| PushStream { stream, values })
            .collect(),
    }
}

fn stream_labels(record: &Value) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    for field in ["service", "env", "level"] {
        let value = record
            .get(field)
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        labels.insert(field.to_string(), value.to_string());
    }
    if let Some(extra) = record.get("labels").and_then(Value::as_object) {
        for (key, value) in extra {
            if let Some(value) = value.as_str() {
                labels.insert(key.clone(), value.to_string());
            }
        }
    }
    labels
}

fn record_timestamp_nanos(record: &Value) -> i64 {
    record
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .and_then(|dt| dt.timestamp_nanos_opt())
        .unwrap_or_else(|| Utc::now().timestamp_nanos_opt().unwrap_or(0))
}

fn log_line(record: &Value) -> String {
    let mut line = serde_json::Map::new();
    line.insert(
        "message".to_string(),
        record.get("message").cloned().unwrap_or(Value::Null),
    );
    for field in ["metadata", "trace_id", "span_id"] {
        if let Some(value) = record.get(field) {
            line.insert(field.to_string(), value.clone());
        }
    }
    Value::Object(line).to_string()
}
