//! Asynchronous forwarder: drains ready WAL segments downstream
//!
//! Cycle state machine: IDLE -> SCAN -> (SEND -> DELETE)* -> IDLE.
//! A segment is deleted only after every batch built from it got a 2xx,
//! so delivery is at-least-once; a crash between send and delete means
//! redelivery, never loss.

pub mod push;

pub use push::{
    build_payload, DownstreamConfig, LokiClient, PushClient, PushError, PushPayload, PushStream,
};

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::metrics::MetricsCollector;
use crate::wal::{scan_segment, SegmentInfo, WalManager};

/// Counts from one forwarder cycle.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct ForwardReport {
    pub entries_forwarded: usize,
    pub segments_processed: usize,
    pub segments_failed: usize,
}

/// Why a segment was left on disk this cycle.
#[derive(Debug)]
enum SegmentFailure {
    /// 4xx other than 429: the payload is rejected, retrying cannot
    /// succeed; the segment is left for operator inspection.
    Fatal(u16),
    /// Retries exhausted; a later cycle tries again.
    Exhausted,
    /// Could not read the segment file
    Io(String),
}

/// Forwards ready segments to the downstream push endpoint.
pub struct Forwarder {
    wal: Arc<WalManager>,
    client: Arc<dyn PushClient>,
    config: DownstreamConfig,
    metrics: Arc<MetricsCollector>,
    /// One cycle at a time; force-flush queues behind a running cycle.
    cycle_lock: Mutex<()>,
}

impl Forwarder {
    pub fn new(
        wal: Arc<WalManager>,
        client: Arc<dyn PushClient>,
        config: DownstreamConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            wal,
            client,
            config,
            metrics,
            cycle_lock: Mutex::new(()),
        }
    }

    /// Run one cycle over all tenants, or one tenant for a targeted
    /// force-flush. Never propagates segment failures; they are logged
    /// and counted, and the segments stay on disk for a later cycle.
    pub async fn run_cycle(&self, token: Option<&str>) -> ForwardReport {
        let _guard = self.cycle_lock.lock().await;
        let mut report = ForwardReport::default();

        let segments = match self.wal.ready_segments(token) {
            Ok(segments) => segments,
            Err(e) => {
                error!(error = %e, "failed to enumerate ready segments");
                return report;
            }
        };

        if segments.is_empty() {
            debug!("no ready segments");
            return report;
        }

        for segment in &segments {
            match self.forward_segment(segment).await {
                Ok(Some(entries)) => {
                    report.entries_forwarded += entries;
                    report.segments_processed += 1;
                    MetricsCollector::add(&self.metrics.entries_forwarded, entries as u64);
                    MetricsCollector::inc(&self.metrics.segments_forwarded);
                }
                Ok(None) => {}
                Err(failure) => {
                    report.segments_failed += 1;
                    MetricsCollector::inc(&self.metrics.segments_failed);
                    match failure {
                        SegmentFailure::Fatal(status) => error!(
                            segment = %segment.path.display(),
                            status,
                            "downstream rejected payload, leaving segment for inspection"
                        ),
                        SegmentFailure::Exhausted => warn!(
                            segment = %segment.path.display(),
                            "retries exhausted, will retry in a later cycle"
                        ),
                        SegmentFailure::Io(e) => error!(
                            segment = %segment.path.display(),
                            error = %e,
                            "failed to read segment"
                        ),
                    }
                }
            }
        }

        info!(
            entries_forwarded = report.entries_forwarded,
            segments_processed = report.segments_processed,
            segments_failed = report.segments_failed,
            "forwarder cycle complete"
        );
        report
    }

    /// Forward one segment. Returns the number of entries shipped, or
    /// None for a segment with no valid records.
    async fn forward_segment(&self, segment: &SegmentInfo) -> Result<Option<usize>, SegmentFailure> {
        let scan = scan_segment(&segment.path).map_err(|e| SegmentFailure::Io(e.to_string()))?;
        if scan.corrupt_records > 0 {
            MetricsCollector::add(&self.metrics.records_corrupt, scan.corrupt_records as u64);
        }

        let mut records = Vec::with_capacity(scan.records.len());
        for payload in &scan.records {
            match serde_json::from_slice::<Value>(payload) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(
                        segment = %segment.path.display(),
                        error = %e,
                        "record passed CRC but is not valid JSON, skipping"
                    );
                    MetricsCollector::inc(&self.metrics.records_corrupt);
                }
            }
        }

        if records.is_empty() {
            info!(segment = %segment.path.display(), "segment holds no valid records");
            return Ok(None);
        }

        for batch in self.batches(&records) {
            let payload = build_payload(batch);
            self.send_with_retry(&payload).await?;
        }

        if let Err(e) = self.wal.delete_segment(&segment.path) {
            // The records are already downstream; redelivery on the next
            // cycle is the at-least-once contract working as intended.
            warn!(segment = %segment.path.display(), error = %e, "failed to delete forwarded segment");
        }
        Ok(Some(records.len()))
    }

    /// Split records into POST-sized batches bounded by both entry count
    /// and serialized size.
    fn batches<'a>(&self, records: &'a [Value]) -> Vec<&'a [Value]> {
        let mut batches = Vec::new();
        let mut start = 0;
        let mut bytes = 0usize;

        for (i, record) in records.iter().enumerate() {
            let record_bytes = serde_json::to_vec(record).map(|v| v.len()).unwrap_or(0);
            let split = i > start
                && (i - start >= self.config.batch_max_entries
                    || bytes + record_bytes > self.config.batch_max_bytes);
            if split {
                batches.push(&records[start..i]);
                start = i;
                bytes = 0;
            }
            bytes += record_bytes;
        }
        batches.push(&records[start..]);
        batches
    }

    async fn send_with_retry(&self, payload: &PushPayload) -> Result<(), SegmentFailure> {
        for attempt in 0..=self.config.max_retries {
            match self.client.push(payload).await {
                Ok(()) => {
                    debug!(entries = payload.entry_count(), attempt, "push succeeded");
                    return Ok(());
                }
                Err(PushError::Status { status }) if is_fatal_status(status) => {
                    return Err(SegmentFailure::Fatal(status));
                }
                Err(e) => {
                    warn!(attempt, error = %e, "push failed");
                    if attempt < self.config.max_retries {
                        MetricsCollector::inc(&self.metrics.forward_retries_total);
                        self.sleep_backoff(attempt).await;
                    }
                }
            }
        }

        // Park before giving the cycle back; a later cycle retries.
        tokio::time::sleep(Duration::from_secs(self.config.backoff_park_seconds)).await;
        Err(SegmentFailure::Exhausted)
    }

    async fn sleep_backoff(&self, attempt: usize) {
        let schedule = &self.config.backoff_seconds;
        if schedule.is_empty() {
            return;
        }
        let seconds = schedule[attempt.min(schedule.len() - 1)];
        tokio::time::sleep(Duration::from_secs(seconds)).await;
    }
}

/// 4xx means a malformed payload and will never succeed on retry,
/// except 429 which is backpressure.
fn is_fatal_status(status: u16) -> bool {
    (400..500).contains(&status) && status != 429
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::WalConfig;
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use tempfile::TempDir;

    /// Scripted downstream: pops one outcome per push, then accepts.
    struct ScriptedClient {
        script: SyncMutex<VecDeque<Result<(), PushError>>>,
        pushes: SyncMutex<Vec<PushPayload>>,
    }

    impl ScriptedClient {
        fn new(script: Vec<Result<(), PushError>>) -> Arc<Self> {
            Arc::new(Self {
                script: SyncMutex::new(script.into()),
                pushes: SyncMutex::new(Vec::new()),
            })
        }

        fn push_count(&self) -> usize {
            self.pushes.lock().len()
        }
    }

    #[async_trait]
    impl PushClient for ScriptedClient {
        async fn push(&self, payload: &PushPayload) -> Result<(), PushError> {
            self.pushes.lock().push(payload.clone());
            self.script.lock().pop_front().unwrap_or(Ok(()))
        }
    }

    fn fast_config() -> DownstreamConfig {
        DownstreamConfig {
            max_retries: 3,
            backoff_seconds: vec![0],
            backoff_park_seconds: 0,
            ..Default::default()
        }
    }

    async fn setup(
        script: Vec<Result<(), PushError>>,
        config: DownstreamConfig,
    ) -> (TempDir, Arc<WalManager>, Arc<ScriptedClient>, Forwarder) {
        let root = TempDir::new().unwrap();
        let wal = Arc::new(
            WalManager::new(WalConfig {
                wal_root_path: root.path().to_path_buf(),
                ..Default::default()
            })
            .unwrap(),
        );
        let client = ScriptedClient::new(script);
        let forwarder = Forwarder::new(
            wal.clone(),
            client.clone(),
            config,
            Arc::new(MetricsCollector::new()),
        );
        (root, wal, client, forwarder)
    }

    fn entry(message: &str) -> Value {
        json!({
            "timestamp": "2025-01-01T00:00:00Z",
            "level": "INFO",
            "message": message,
            "service": "svc",
            "env": "prod"
        })
    }

    #[tokio::test]
    async fn test_successful_cycle_deletes_segment() {
        let (_root, wal, client, forwarder) = setup(vec![], fast_config()).await;

        wal.append("tok", &[entry("one"), entry("two")]).await.unwrap();
        let ready = wal.rotate_active("tok").await.unwrap().unwrap();

        let report = forwarder.run_cycle(None).await;
        assert_eq!(report.entries_forwarded, 2);
        assert_eq!(report.segments_processed, 1);
        assert_eq!(report.segments_failed, 0);
        assert!(!ready.exists());

        let payload = &client.pushes.lock()[0];
        assert_eq!(payload.streams[0].stream["service"], "svc");
        assert_eq!(payload.streams[0].stream["env"], "prod");
        assert_eq!(payload.streams[0].stream["level"], "INFO");
    }

    #[tokio::test]
    async fn test_eventual_success_after_5xx() {
        let (_root, wal, client, forwarder) = setup(
            vec![
                Err(PushError::Status { status: 500 }),
                Err(PushError::Status { status: 500 }),
                Ok(()),
            ],
            fast_config(),
        )
        .await;

        wal.append("tok", &[entry("retry-me")]).await.unwrap();
        let ready = wal.rotate_active("tok").await.unwrap().unwrap();

        let report = forwarder.run_cycle(None).await;
        assert_eq!(report.entries_forwarded, 1);
        assert!(!ready.exists());
        assert_eq!(client.push_count(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_leave_segment() {
        let failures = (0..8)
            .map(|_| Err(PushError::Transport("connection refused".into())))
            .collect();
        let (_root, wal, client, forwarder) = setup(failures, fast_config()).await;

        wal.append("tok", &[entry("stuck")]).await.unwrap();
        let ready = wal.rotate_active("tok").await.unwrap().unwrap();

        let report = forwarder.run_cycle(None).await;
        assert_eq!(report.segments_failed, 1);
        assert_eq!(report.entries_forwarded, 0);
        assert!(ready.exists());
        // First attempt + max_retries.
        assert_eq!(client.push_count(), 4);

        // The next cycle picks the same segment up again.
        let report = forwarder.run_cycle(None).await;
        assert_eq!(report.entries_forwarded, 1);
        assert!(!ready.exists());
    }

    #[tokio::test]
    async fn test_fatal_4xx_skips_without_delete_or_retry() {
        let (_root, wal, client, forwarder) = setup(
            vec![Err(PushError::Status { status: 400 })],
            fast_config(),
        )
        .await;

        wal.append("tok", &[entry("bad")]).await.unwrap();
        let ready = wal.rotate_active("tok").await.unwrap().unwrap();

        let report = forwarder.run_cycle(None).await;
        assert_eq!(report.segments_failed, 1);
        assert!(ready.exists());
        assert_eq!(client.push_count(), 1);
    }

    #[tokio::test]
    async fn test_429_is_retried() {
        let (_root, wal, client, forwarder) = setup(
            vec![Err(PushError::Status { status: 429 }), Ok(())],
            fast_config(),
        )
        .await;

        wal.append("tok", &[entry("throttled")]).await.unwrap();
        wal.rotate_active("tok").await.unwrap();

        let report = forwarder.run_cycle(None).await;
        assert_eq!(report.entries_forwarded, 1);
        assert_eq!(client.push_count(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_record_skipped_neighbours_forwarded() {
        let (_root, wal, _client, forwarder) = setup(vec![], fast_config()).await;

        wal.append("tok", &[entry("first"), entry("second"), entry("third")])
            .await
            .unwrap();
        let ready = wal.rotate_active("tok").await.unwrap().unwrap();

        // Corrupt 4 bytes inside the second record's payload.
        let mut bytes = std::fs::read(&ready).unwrap();
        let first_frame_len =
            u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize + 8;
        let target = first_frame_len + 4 + 10;
        for b in &mut bytes[target..target + 4] {
            *b ^= 0xFF;
        }
        std::fs::write(&ready, &bytes).unwrap();

        let report = forwarder.run_cycle(None).await;
        assert_eq!(report.entries_forwarded, 2);
        assert_eq!(report.segments_processed, 1);
        assert!(!ready.exists());
    }

    #[tokio::test]
    async fn test_targeted_cycle_only_touches_one_tenant() {
        let (_root, wal, _client, forwarder) = setup(vec![], fast_config()).await;

        wal.append("tenant-a", &[entry("a")]).await.unwrap();
        let ready_a = wal.rotate_active("tenant-a").await.unwrap().unwrap();
        wal.append("tenant-b", &[entry("b")]).await.unwrap();
        let ready_b = wal.rotate_active("tenant-b").await.unwrap().unwrap();

        let report = forwarder.run_cycle(Some("tenant-a")).await;
        assert_eq!(report.segments_processed, 1);
        assert!(!ready_a.exists());
        assert!(ready_b.exists());
    }

    #[tokio::test]
    async fn test_large_segment_split_into_batches() {
        let config = DownstreamConfig {
            batch_max_entries: 2,
            ..fast_config()
        };
        let (_root, wal, client, forwarder) = setup(vec![], config).await;

        let entries: Vec<Value> = (0..5).map(|i| entry(&format!("m{i}"))).collect();
        wal.append("tok", &entries).await.unwrap();
        wal.rotate_active("tok").await.unwrap();

        let report = forwarder.run_cycle(None).await;
        assert_eq!(report.entries_forwarded, 5);
        // 5 entries at 2 per POST.
        assert_eq!(client.push_count(), 3);
    }
}
