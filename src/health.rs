//! Readiness probes: downstream reachability, disk headroom, WAL
//! writability, forwarder liveness

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::GatewayError;
use crate::forwarder::DownstreamConfig;

/// Timeout for the downstream readiness probe; kept well below the
/// forwarder's push timeout so a dead Loki cannot stall `/readyz`.
const DOWNSTREAM_PROBE_TIMEOUT_SECS: u64 = 5;

/// One probe result.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub name: &'static str,
    pub status: &'static str,
    pub message: String,
}

impl HealthCheck {
    fn healthy(name: &'static str, message: String) -> Self {
        Self {
            name,
            status: "healthy",
            message,
        }
    }

    fn unhealthy(name: &'static str, message: String) -> Self {
        Self {
            name,
            status: "unhealthy",
            message,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Aggregated readiness.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub is_healthy: bool,
    pub checks: Vec<HealthCheck>,
    pub failed_checks: Vec<&'static str>,
}

pub struct HealthChecker {
    wal_root: PathBuf,
    min_free_ratio: f64,
    downstream_ready_url: String,
    client: reqwest::Client,
}

impl HealthChecker {
    pub fn new(
        wal_root: &Path,
        min_free_ratio: f64,
        downstream: &DownstreamConfig,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DOWNSTREAM_PROBE_TIMEOUT_SECS))
            .build()
            .map_err(|e| GatewayError::Config(format!("cannot build health probe client: {e}")))?;
        Ok(Self {
            wal_root: wal_root.to_path_buf(),
            min_free_ratio,
            downstream_ready_url: downstream.ready_url(),
            client,
        })
    }

    /// Run all probes. The caller supplies forwarder liveness since the
    /// checker holds no reference into the scheduler.
    pub async fn check_all(&self, forwarder_running: bool) -> HealthStatus {
        let checks = vec![
            self.check_downstream().await,
            self.check_disk(),
            self.check_wal_writable(),
            check_forwarder(forwarder_running),
        ];
        let failed_checks: Vec<&'static str> = checks
            .iter()
            .filter(|c| !c.is_healthy())
            .map(|c| c.name)
            .collect();
        if !failed_checks.is_empty() {
            warn!(failed = ?failed_checks, "readiness degraded");
        }
        HealthStatus {
            is_healthy: failed_checks.is_empty(),
            checks,
            failed_checks,
        }
    }

    /// Probe the downstream readiness endpoint with a short timeout.
    async fn check_downstream(&self) -> HealthCheck {
        match self.client.get(&self.downstream_ready_url).send().await {
            Ok(response) if response.status().is_success() => HealthCheck::healthy(
                "downstream",
                format!("downstream reachable at {}", self.downstream_ready_url),
            ),
            Ok(response) => HealthCheck::unhealthy(
                "downstream",
                format!(
                    "downstream returned status {} at {}",
                    response.status().as_u16(),
                    self.downstream_ready_url
                ),
            ),
            Err(e) => HealthCheck::unhealthy(
                "downstream",
                format!("cannot reach downstream: {e}"),
            ),
        }
    }

    fn check_disk(&self) -> HealthCheck {
        match disk_free_ratio(&self.wal_root) {
            Ok(ratio) if ratio >= self.min_free_ratio => HealthCheck::healthy(
                "disk",
                format!("disk space OK: {:.1}% free", ratio * 100.0),
            ),
            Ok(ratio) => HealthCheck::unhealthy(
                "disk",
                format!(
                    "low disk space: {:.1}% free (min {:.1}%)",
                    ratio * 100.0,
                    self.min_free_ratio * 100.0
                ),
            ),
            Err(e) => HealthCheck::unhealthy("disk", format!("disk check failed: {e}")),
        }
    }

    fn check_wal_writable(&self) -> HealthCheck {
        if !self.wal_root.is_dir() {
            return HealthCheck::unhealthy(
                "wal",
                format!("WAL root is not a directory: {}", self.wal_root.display()),
            );
        }
        let probe = self.wal_root.join(".health_check");
        match std::fs::write(&probe, b"ok").and_then(|_| std::fs::remove_file(&probe)) {
            Ok(()) => HealthCheck::healthy("wal", "WAL root writable".to_string()),
            Err(e) => HealthCheck::unhealthy("wal", format!("WAL root not writable: {e}")),
        }
    }
}

fn check_forwarder(running: bool) -> HealthCheck {
    if running {
        HealthCheck::healthy("forwarder", "forwarder service running".to_string())
    } else {
        HealthCheck::unhealthy("forwarder", "forwarder service not running".to_string())
    }
}

/// Free-space ratio of the filesystem holding `path`.
#[cfg(unix)]
pub fn disk_free_ratio(path: &Path) -> std::io::Result<f64> {
    use std::os::unix::ffi::OsStrExt;

    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let mut stats: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stats) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    if stats.f_blocks == 0 {
        return Ok(0.0);
    }
    Ok(stats.f_bavail as f64 / stats.f_blocks as f64)
}

#[cfg(not(unix))]
pub fn disk_free_ratio(_path: &Path) -> std::io::Result<f64> {
    // No portable probe; report full headroom rather than flapping.
    Ok(1.0)
}
