//! Error taxonomy for the ingestion gateway
//!
//! Every user-facing failure carries a stable `error` code string and an
//! HTTP status; the server layer maps variants without inspecting messages.

use serde_json::json;

/// Gateway-wide error type
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Request failed batch or entry validation
    #[error("validation failed ({reason}): {message}")]
    Validation {
        /// Short machine-readable reason tag, e.g. `too_many_entries`
        reason: &'static str,
        message: String,
    },

    /// No bearer token was presented
    #[error("missing authentication token")]
    MissingAuth,

    /// Token is unknown or marked inactive
    #[error("invalid or inactive authentication token")]
    Auth,

    /// Per-tenant token bucket is empty
    #[error("rate limit exceeded, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    /// Tenant exceeded its WAL disk or age quota
    #[error("WAL quota exceeded ({quota})")]
    QuotaExceeded { quota: &'static str },

    /// Disk I/O failure while appending to the WAL
    #[error("WAL write failed: {0}")]
    WalWrite(String),

    /// Masking failed for an entire batch (per-entry failures are redacted inline)
    #[error("masking failed: {0}")]
    Masking(String),

    /// Downstream push failure surfaced to a caller (admin flush)
    #[error("forwarder error: {0}")]
    Forwarder(String),

    /// Invalid configuration detected at startup
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Stable error code string used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Validation { .. } => "validation_error",
            GatewayError::MissingAuth | GatewayError::Auth => "authentication_error",
            GatewayError::RateLimited { .. } => "rate_limit_exceeded",
            GatewayError::QuotaExceeded { .. } => "quota_exceeded",
            GatewayError::WalWrite(_) => "wal_error",
            GatewayError::Masking(_) => "masking_error",
            GatewayError::Forwarder(_) => "forwarder_error",
            GatewayError::Config(_) | GatewayError::Io(_) => "internal_error",
        }
    }

    /// HTTP status code this error surfaces as.
    pub fn status(&self) -> u16 {
        match self {
            GatewayError::Validation { .. } => 400,
            GatewayError::Auth => 401,
            GatewayError::MissingAuth => 403,
            GatewayError::RateLimited { .. } | GatewayError::QuotaExceeded { .. } => 429,
            GatewayError::WalWrite(_)
            | GatewayError::Masking(_)
            | GatewayError::Forwarder(_)
            | GatewayError::Config(_)
            | GatewayError::Io(_) => 500,
        }
    }

    /// Suggested `Retry-After` value, where one applies.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            GatewayError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// Structured details for the API error body.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            GatewayError::Validation { reason, .. } => Some(json!({ "reason": reason })),
            GatewayError::RateLimited { retry_after } => {
                Some(json!({ "retry_after": retry_after }))
            }
            GatewayError::QuotaExceeded { quota } => Some(json!({ "quota_type": quota })),
            _ => None,
        }
    }

    /// Shorthand constructor for validation failures.
    pub fn validation(reason: &'static str, message: impl Into<String>) -> Self {
        GatewayError::Validation {
            reason,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(GatewayError::validation("bad_level", "x").status(), 400);
        assert_eq!(GatewayError::Auth.status(), 401);
        assert_eq!(GatewayError::MissingAuth.status(), 403);
        assert_eq!(GatewayError::RateLimited { retry_after: 2 }.status(), 429);
        assert_eq!(GatewayError::QuotaExceeded { quota: "bytes" }.status(), 429);
        assert_eq!(GatewayError::WalWrite("disk".into()).status(), 500);
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(
            GatewayError::validation("too_many_entries", "x").code(),
            "validation_error"
        );
        assert_eq!(GatewayError::Auth.code(), "authentication_error");
        assert_eq!(
            GatewayError::RateLimited { retry_after: 1 }.code(),
            "rate_limit_exceeded"
        );
        assert_eq!(
            GatewayError::QuotaExceeded { quota: "age" }.code(),
            "quota_exceeded"
        );
        assert_eq!(GatewayError::WalWrite("x".into()).code(), "wal_error");
        assert_eq!(GatewayError::Masking("x".into()).code(), "masking_error");
    }

    #[test]
    fn test_retry_after_details() {
        let err = GatewayError::RateLimited { retry_after: 7 };
        assert_eq!(err.retry_after(), Some(7));
        let details = err.details().unwrap();
        assert_eq!(details["retry_after"], 7);
    }
}
