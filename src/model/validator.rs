//! Stateless batch and entry validation
//!
//! Rejects anything outside the data-model bounds before masking or
//! persistence runs. Side-effect free; every rejection carries a short
//! reason tag the API surfaces in the error details.

use crate::error::GatewayError;
use crate::model::{IngestRequest, LogEntry, LOG_LEVELS};
use crate::Result;

/// Maximum entries per batch
pub const BATCH_ENTRIES_MAX: usize = 500;
/// Maximum total serialized batch size in bytes (1 MiB)
pub const BATCH_BYTES_MAX: usize = 1_048_576;
/// Maximum serialized entry size in bytes (32 KiB)
pub const ENTRY_BYTES_MAX: usize = 32_768;
/// Maximum message length in characters
pub const MESSAGE_CHARS_MAX: usize = 8192;
/// Allowed label keys
pub const ALLOWED_LABELS: [&str; 6] = ["service", "env", "level", "schema_version", "region", "tenant"];
/// Maximum number of label keys
pub const LABELS_MAX: usize = 6;
/// Maximum label value length in characters
pub const LABEL_VALUE_CHARS_MAX: usize = 64;
/// Maximum metadata nesting depth
pub const METADATA_DEPTH_MAX: usize = 5;

const SERVICE_CHARS_MAX: usize = 64;
const ENV_CHARS_MAX: usize = 32;
const TRACE_ID_CHARS_MAX: usize = 128;
const SPAN_ID_CHARS_MAX: usize = 64;
const IDEMPOTENCY_KEY_CHARS_MAX: usize = 128;

/// Validate a full ingestion request: per-entry constraints plus
/// batch-level entry count and total size bounds.
pub fn validate_batch(request: &IngestRequest) -> Result<()> {
    if request.entries.is_empty() || request.entries.len() > BATCH_ENTRIES_MAX {
        return Err(GatewayError::validation(
            "too_many_entries",
            format!(
                "batch must contain between 1 and {} entries, got {}",
                BATCH_ENTRIES_MAX,
                request.entries.len()
            ),
        ));
    }

    if let Some(key) = &request.idempotency_key {
        if key.chars().count() > IDEMPOTENCY_KEY_CHARS_MAX {
            return Err(GatewayError::validation(
                "idempotency_key_too_long",
                format!("idempotency_key exceeds {IDEMPOTENCY_KEY_CHARS_MAX} characters"),
            ));
        }
    }

    let mut total_bytes = 0usize;
    for (index, entry) in request.entries.iter().enumerate() {
        let size = validate_entry(entry)
            .map_err(|e| with_entry_index(e, index))?;
        total_bytes += size;
    }

    if total_bytes > BATCH_BYTES_MAX {
        return Err(GatewayError::validation(
            "batch_too_large",
            format!("batch serialized size {total_bytes} exceeds {BATCH_BYTES_MAX} bytes"),
        ));
    }

    Ok(())
}

/// Validate one entry; returns its serialized size so the caller can
/// accumulate the batch total without re-serializing.
pub fn validate_entry(entry: &LogEntry) -> Result<usize> {
    if !LOG_LEVELS.contains(&entry.level.as_str()) {
        return Err(GatewayError::validation(
            "bad_level",
            format!("level '{}' not one of {:?}", entry.level, LOG_LEVELS),
        ));
    }

    let message_chars = entry.message.chars().count();
    if message_chars == 0 || message_chars > MESSAGE_CHARS_MAX {
        return Err(GatewayError::validation(
            "bad_message",
            format!("message must be 1-{MESSAGE_CHARS_MAX} characters, got {message_chars}"),
        ));
    }

    validate_identifier(&entry.service, "service", SERVICE_CHARS_MAX, "bad_service")?;
    validate_identifier(&entry.env, "env", ENV_CHARS_MAX, "bad_env")?;

    if let Some(trace_id) = &entry.trace_id {
        if trace_id.chars().count() > TRACE_ID_CHARS_MAX {
            return Err(GatewayError::validation(
                "trace_id_too_long",
                format!("trace_id exceeds {TRACE_ID_CHARS_MAX} characters"),
            ));
        }
    }
    if let Some(span_id) = &entry.span_id {
        if span_id.chars().count() > SPAN_ID_CHARS_MAX {
            return Err(GatewayError::validation(
                "span_id_too_long",
                format!("span_id exceeds {SPAN_ID_CHARS_MAX} characters"),
            ));
        }
    }

    if let Some(labels) = &entry.labels {
        validate_labels(labels)?;
    }

    if let Some(metadata) = &entry.metadata {
        check_depth(metadata, 0)?;
    }

    let size = entry.serialized_size();
    if size > ENTRY_BYTES_MAX {
        return Err(GatewayError::validation(
            "entry_too_large",
            format!("entry serialized size {size} exceeds {ENTRY_BYTES_MAX} bytes"),
        ));
    }

    Ok(size)
}

fn validate_identifier(
    value: &str,
    field: &str,
    max_chars: usize,
    reason: &'static str,
) -> Result<()> {
    let chars = value.chars().count();
    let well_formed = chars >= 1
        && chars <= max_chars
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !well_formed {
        return Err(GatewayError::validation(
            reason,
            format!("{field} must be 1-{max_chars} chars matching [a-z0-9-]+, got '{value}'"),
        ));
    }
    Ok(())
}

fn validate_labels(labels: &std::collections::HashMap<String, String>) -> Result<()> {
    if labels.len() > LABELS_MAX {
        return Err(GatewayError::validation(
            "too_many_labels",
            format!("labels cannot have more than {LABELS_MAX} keys, got {}", labels.len()),
        ));
    }
    for (key, value) in labels {
        if !ALLOWED_LABELS.contains(&key.as_str()) {
            return Err(GatewayError::validation(
                "bad_label_key",
                format!("label key '{key}' not in allowed list {ALLOWED_LABELS:?}"),
            ));
        }
        if value.chars().count() > LABEL_VALUE_CHARS_MAX {
            return Err(GatewayError::validation(
                "label_too_long",
                format!("label value for '{key}' exceeds {LABEL_VALUE_CHARS_MAX} characters"),
            ));
        }
    }
    Ok(())
}

fn check_depth(value: &serde_json::Value, depth: usize) -> Result<()> {
    if depth > METADATA_DEPTH_MAX {
        return Err(GatewayError::validation(
            "metadata_too_deep",
            format!("metadata nesting exceeds {METADATA_DEPTH_MAX} levels"),
        ));
    }
    match value {
        serde_json::Value::Object(map) => {
            for child in map.values() {
                check_depth(child, depth + 1)?;
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                check_depth(item, depth + 1)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn with_entry_index(err: GatewayError, index: usize) -> GatewayError {
    match err {
        GatewayError::Validation { reason, message } => GatewayError::Validation {
            reason,
            message: format!("entry {index}: {message}"),
        },
        other => other,
    }
}
