//! Ingestion and forwarding counters with Prometheus text exposition

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Process-wide counters. Cheap atomic increments; read only by the
/// `/metrics` endpoint.
pub struct MetricsCollector {
    started_at: Instant,
    pub entries_received: AtomicU64,
    pub entries_accepted: AtomicU64,
    pub entries_rejected: AtomicU64,
    pub entries_masked: AtomicU64,
    pub entries_forwarded: AtomicU64,
    pub segments_rotated: AtomicU64,
    pub segments_forwarded: AtomicU64,
    pub segments_failed: AtomicU64,
    pub records_corrupt: AtomicU64,
    pub rate_limited_total: AtomicU64,
    pub quota_rejected_total: AtomicU64,
    pub forward_retries_total: AtomicU64,
    pub wal_bytes_written: AtomicU64,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            entries_received: AtomicU64::new(0),
            entries_accepted: AtomicU64::new(0),
            entries_rejected: AtomicU64::new(0),
            entries_masked: AtomicU64::new(0),
            entries_forwarded: AtomicU64::new(0),
            segments_rotated: AtomicU64::new(0),
            segments_forwarded: AtomicU64::new(0),
            segments_failed: AtomicU64::new(0),
            records_corrupt: AtomicU64::new(0),
            rate_limited_total: AtomicU64::new(0),
            quota_rejected_total: AtomicU64::new(0),
            forward_retries_total: AtomicU64::new(0),
            wal_bytes_written: AtomicU64::new(0),
        }
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc(counter: &AtomicU64) {
        Self::add(counter, 1);
    }

    /// Render all counters in Prometheus text format.
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        write_metric(
            &mut output,
            "loggate_uptime_seconds",
            "gauge",
            "Seconds since process start",
            self.started_at.elapsed().as_secs(),
        );

        let counters: [(&str, &str, &AtomicU64); 13] = [
            ("loggate_entries_received_total", "Entries received in ingest requests", &self.entries_received),
            ("loggate_entries_accepted_total", "Entries accepted and persisted to the WAL", &self.entries_accepted),
            ("loggate_entries_rejected_total", "Entries rejected by validation", &self.entries_rejected),
            ("loggate_entries_masked_total", "Entries run through the masking engine", &self.entries_masked),
            ("loggate_entries_forwarded_total", "Entries shipped downstream", &self.entries_forwarded),
            ("loggate_segments_rotated_total", "WAL segments rotated active to ready", &self.segments_rotated),
            ("loggate_segments_forwarded_total", "Ready segments forwarded and deleted", &self.segments_forwarded),
            ("loggate_segments_failed_total", "Segment forward attempts abandoned", &self.segments_failed),
            ("loggate_records_corrupt_total", "Records skipped on CRC mismatch", &self.records_corrupt),
            ("loggate_rate_limited_total", "Requests rejected by the rate limiter", &self.rate_limited_total),
            ("loggate_quota_rejected_total", "Appends rejected by WAL quotas", &self.quota_rejected_total),
            ("loggate_forward_retries_total", "Downstream push retries", &self.forward_retries_total),
            ("loggate_wal_bytes_written_total", "Bytes appended to WAL segments", &self.wal_bytes_written),
        ];

        for (name, help, counter) in counters {
            write_metric(
                &mut output,
                name,
                "counter",
                help,
                counter.load(Ordering::Relaxed),
            );
        }

        output
    }
}

fn write_metric(output: &mut String, name: &str, kind: &str, help: &str, value: u64) {
    writeln!(output, "# HELP {name} {help}").unwrap();
    writeln!(output, "# TYPE {name} {kind}").unwrap();
    writeln!(output, "{name} {value}").unwrap();
}
