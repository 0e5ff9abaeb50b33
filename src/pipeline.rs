//! Ingest pipeline: rate-limit -> validate -> mask -> WAL append -> ack
//!
//! Authentication happens in the HTTP layer before the pipeline runs;
//! the pipeline receives an already-authenticated tenant token. Once
//! `append` returns, the batch is durable: a producer disconnect after
//! that point loses nothing.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::token_display;
use crate::error::GatewayError;
use crate::limiter::RateLimiter;
use crate::masking::MaskingEngine;
use crate::metrics::MetricsCollector;
use crate::model::{validator, IngestRequest, IngestResponse};
use crate::wal::WalManager;
use crate::Result;

pub struct IngestPipeline {
    limiter: Arc<RateLimiter>,
    masking: Arc<MaskingEngine>,
    wal: Arc<WalManager>,
    metrics: Arc<MetricsCollector>,
}

impl IngestPipeline {
    pub fn new(
        limiter: Arc<RateLimiter>,
        masking: Arc<MaskingEngine>,
        wal: Arc<WalManager>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            limiter,
            masking,
            wal,
            metrics,
        }
    }

    /// Process one batch for an authenticated tenant.
    pub async fn ingest(
        &self,
        token: &str,
        request: IngestRequest,
        idempotency_key: Option<&str>,
    ) -> Result<IngestResponse> {
        let request_id = Uuid::new_v4().to_string();
        let received = Utc::now();
        MetricsCollector::add(&self.metrics.entries_received, request.entries.len() as u64);

        debug!(
            token = %token_display(token),
            request_id = %request_id,
            entries = request.entries.len(),
            idempotency_key = idempotency_key.unwrap_or(""),
            "processing ingest request"
        );

        self.limiter.check(token).map_err(|e| {
            MetricsCollector::inc(&self.metrics.rate_limited_total);
            e
        })?;

        validator::validate_batch(&request).map_err(|e| {
            MetricsCollector::add(&self.metrics.entries_rejected, request.entries.len() as u64);
            e
        })?;

        let values: Vec<Value> = request
            .entries
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| GatewayError::Masking(format!("cannot decode entry: {e}")))?;

        let masked = self.masking.mask_entries(&values, token);
        MetricsCollector::add(&self.metrics.entries_masked, masked.len() as u64);

        let bytes_written = self.wal.append(token, &masked).await.map_err(|e| {
            if matches!(e, GatewayError::QuotaExceeded { .. }) {
                MetricsCollector::inc(&self.metrics.quota_rejected_total);
            }
            e
        })?;
        MetricsCollector::add(&self.metrics.wal_bytes_written, bytes_written);
        MetricsCollector::add(&self.metrics.entries_accepted, masked.len() as u64);

        info!(
            token = %token_display(token),
            request_id = %request_id,
            entries_accepted = masked.len(),
            bytes_written,
            "batch accepted"
        );

        Ok(IngestResponse {
            message: "Logs accepted for processing".to_string(),
            entries_accepted: masked.len(),
            request_id,
            timestamp: received,
        })
    }
}
