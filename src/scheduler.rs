//! Background service driving the forwarder on a fixed interval
//!
//! A single logical task: start is idempotent, stop cancels the next
//! cycle and waits for the in-flight one to finish its current segment.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::forwarder::{ForwardReport, Forwarder};

pub struct ForwarderService {
    forwarder: Arc<Forwarder>,
    interval: Duration,
    running: Arc<AtomicBool>,
    task: Mutex<Option<(JoinHandle<()>, watch::Sender<bool>)>>,
}

impl ForwarderService {
    pub fn new(forwarder: Arc<Forwarder>, interval: Duration) -> Self {
        Self {
            forwarder,
            interval,
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    /// Start the periodic forwarding loop. Calling start on a running
    /// service is a no-op.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            warn!("forwarder service already running");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let forwarder = self.forwarder.clone();
        let interval = self.interval;
        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(async move {
            info!(interval_seconds = interval.as_secs(), "forwarder service started");
            loop {
                forwarder.run_cycle(None).await;
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown_rx.changed() => break,
                }
            }
            running.store(false, Ordering::SeqCst);
            info!("forwarder service stopped");
        });

        *task = Some((handle, shutdown_tx));
    }

    /// Stop the loop; waits for an in-flight cycle to finish.
    pub async fn stop(&self) {
        let taken = self.task.lock().take();
        let Some((handle, shutdown_tx)) = taken else {
            return;
        };
        let _ = shutdown_tx.send(true);
        if handle.await.is_err() {
            warn!("forwarder task ended abnormally");
        }
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one extra cycle immediately, optionally for one tenant.
    /// Serializes with the periodic cycle through the forwarder's own
    /// cycle lock.
    pub async fn force_flush(&self, token: Option<&str>) -> ForwardReport {
        info!(tenant_targeted = token.is_some(), "force flush requested");
        self.forwarder.run_cycle(token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forwarder::{DownstreamConfig, PushClient, PushError, PushPayload};
    use crate::metrics::MetricsCollector;
    use crate::wal::{WalConfig, WalManager};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    struct CountingClient {
        pushes: AtomicUsize,
    }

    #[async_trait]
    impl PushClient for CountingClient {
        async fn push(&self, _payload: &PushPayload) -> Result<(), PushError> {
            self.pushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn service(root: &std::path::Path, interval: Duration) -> (Arc<WalManager>, Arc<CountingClient>, Arc<ForwarderService>) {
        let wal = Arc::new(
            WalManager::new(WalConfig {
                wal_root_path: root.to_path_buf(),
                ..Default::default()
            })
            .unwrap(),
        );
        let client = Arc::new(CountingClient {
            pushes: AtomicUsize::new(0),
        });
        let forwarder = Arc::new(Forwarder::new(
            wal.clone(),
            client.clone(),
            DownstreamConfig {
                backoff_seconds: vec![0],
                backoff_park_seconds: 0,
                ..Default::default()
            },
            Arc::new(MetricsCollector::new()),
        ));
        (wal, client, Arc::new(ForwarderService::new(forwarder, interval)))
    }

    fn entry() -> serde_json::Value {
        json!({
            "timestamp": "2025-01-01T00:00:00Z",
            "level": "INFO",
            "message": "m",
            "service": "svc",
            "env": "prod"
        })
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_works() {
        let root = TempDir::new().unwrap();
        let (_wal, _client, service) = service(root.path(), Duration::from_secs(3600));

        service.start();
        service.start();
        assert!(service.is_running());

        service.stop().await;
        assert!(!service.is_running());
        // Stopping twice is fine.
        service.stop().await;
    }

    #[tokio::test]
    async fn test_periodic_cycle_forwards_ready_segments() {
        let root = TempDir::new().unwrap();
        let (wal, client, service) = service(root.path(), Duration::from_millis(20));

        wal.append("tok", &[entry()]).await.unwrap();
        let ready = wal.rotate_active("tok").await.unwrap().unwrap();

        service.start();
        for _ in 0..50 {
            if !ready.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        service.stop().await;

        assert!(!ready.exists());
        assert!(client.pushes.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_force_flush_runs_without_started_loop() {
        let root = TempDir::new().unwrap();
        let (wal, _client, service) = service(root.path(), Duration::from_secs(3600));

        wal.append("tok", &[entry()]).await.unwrap();
        let ready = wal.rotate_active("tok").await.unwrap().unwrap();

        let report = service.force_flush(None).await;
        assert_eq!(report.segments_processed, 1);
        assert_eq!(report.entries_forwarded, 1);
        assert!(!ready.exists());
    }

    #[tokio::test]
    async fn test_force_flush_targets_one_tenant() {
        let root = TempDir::new().unwrap();
        let (wal, _client, service) = service(root.path(), Duration::from_secs(3600));

        wal.append("a", &[entry()]).await.unwrap();
        wal.rotate_active("a").await.unwrap();
        wal.append("b", &[entry()]).await.unwrap();
        let ready_b = wal.rotate_active("b").await.unwrap().unwrap();

        let report = service.force_flush(Some("a")).await;
        assert_eq!(report.segments_processed, 1);
        assert!(ready_b.exists());
    }
}
