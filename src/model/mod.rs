//! Log entry data model and request/response types

pub mod validator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Allowed log levels
pub const LOG_LEVELS: [&str; 5] = ["DEBUG", "INFO", "WARN", "ERROR", "FATAL"];

/// Individual log entry as received from a producer.
///
/// The level is kept as a string so the validator can report `bad_level`
/// instead of an opaque deserialization failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    /// RFC3339 timestamp when the log event occurred
    pub timestamp: DateTime<Utc>,
    /// Log level (DEBUG, INFO, WARN, ERROR, FATAL)
    pub level: String,
    /// Log message content (1-8192 chars)
    pub message: String,
    /// Service name (lowercase, alphanumeric and hyphens only)
    pub service: String,
    /// Environment, e.g. dev, staging, prod
    pub env: String,

    /// Additional labels (allow-listed keys, max 6, values <=64 chars)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
    /// Distributed tracing trace ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Distributed tracing span ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    /// Additional structured metadata (nesting depth <=5)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl LogEntry {
    /// Serialized byte size of this entry, as persisted to the WAL.
    pub fn serialized_size(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }
}

/// Ingestion request: an ordered batch of 1-500 entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub entries: Vec<LogEntry>,
    /// Optional idempotency key, informative only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// 202 Accepted response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub message: String,
    pub entries_accepted: usize,
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Standard error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable error code
    pub error: String,
    /// Human-readable message
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}
