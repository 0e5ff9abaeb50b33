//! Per-tenant WAL writer with adaptive segment rotation
//!
//! Each tenant owns a directory of numbered segments. Appends for one
//! tenant are serialized by a per-tenant mutex; different tenants append
//! in parallel. The active→ready hand-off is an atomic rename: writers
//! never touch a `.ready` name, the forwarder never writes at all.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::token_display;
use crate::error::GatewayError;
use crate::wal::frame::{encode_frame, truncate_torn_tail};
use crate::wal::scanner::{self, SegmentInfo, SegmentState, WalStats};
use crate::Result;

/// WAL configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalConfig {
    /// Root directory for per-tenant WAL storage
    pub wal_root_path: PathBuf,
    /// Maximum segment size in bytes (128 MiB)
    pub segment_max_bytes: u64,
    /// Rotation age for segments still receiving writes
    pub rotation_time_active_minutes: u64,
    /// Rotation age for idle segments
    pub rotation_time_idle_hours: u64,
    /// Minutes without a write before a segment counts as idle
    pub idle_threshold_minutes: u64,
    /// Minimum size for time-based rotation of an active segment (64 KiB)
    pub min_rotation_bytes: u64,
    /// Rotate regardless of size or activity after this many hours
    pub force_rotation_hours: u64,
    /// Per-tenant disk quota in bytes (2 GiB)
    pub token_wal_quota_bytes: u64,
    /// Per-tenant age quota on retained ready segments
    pub token_wal_quota_age_hours: u64,
    /// Readiness turns unhealthy below this disk free ratio
    pub disk_free_min_ratio: f64,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            wal_root_path: PathBuf::from("./wal"),
            segment_max_bytes: 128 * 1024 * 1024,
            rotation_time_active_minutes: 5,
            rotation_time_idle_hours: 1,
            idle_threshold_minutes: 10,
            min_rotation_bytes: 64 * 1024,
            force_rotation_hours: 6,
            token_wal_quota_bytes: 2 * 1024 * 1024 * 1024,
            token_wal_quota_age_hours: 24,
            disk_free_min_ratio: 0.20,
        }
    }
}

impl WalConfig {
    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_minutes * 60)
    }
    pub fn rotation_time_active(&self) -> Duration {
        Duration::from_secs(self.rotation_time_active_minutes * 60)
    }
    pub fn rotation_time_idle(&self) -> Duration {
        Duration::from_secs(self.rotation_time_idle_hours * 3600)
    }
    pub fn force_rotation(&self) -> Duration {
        Duration::from_secs(self.force_rotation_hours * 3600)
    }
    pub fn quota_age(&self) -> Duration {
        Duration::from_secs(self.token_wal_quota_age_hours * 3600)
    }
}

/// Sanitize a bearer token into a filesystem-safe directory name.
///
/// Format: `<prefix>_<hash>` where the prefix is the token stripped to
/// `[A-Za-z0-9_-]` and truncated to 20 chars, and the hash is the first
/// 8 hex chars of SHA-256 over the raw token. The hash suffix keeps
/// distinct tokens in distinct directories even when their printable
/// prefixes collide; stripping blocks directory traversal.
pub fn sanitize_token(token: &str) -> String {
    let prefix: String = token
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .take(20)
        .collect();

    let digest = Sha256::digest(token.as_bytes());
    let hash: String = digest[..4].iter().map(|b| format!("{b:02x}")).collect();

    format!("{prefix}_{hash}")
}

/// Snapshot of an active segment, fed to the rotation rules.
#[derive(Debug, Clone, Copy)]
pub struct SegmentStatus {
    pub size_bytes: u64,
    /// Time since segment creation
    pub age: Duration,
    /// Time since last write
    pub idle_for: Duration,
}

/// Adaptive rotation rules, evaluated on append:
/// size cap always rotates; an actively-written segment rotates once it
/// is old and big enough; an idle segment rotates on a longer timer;
/// a hard age cap rotates regardless.
pub fn should_rotate(status: &SegmentStatus, config: &WalConfig) -> bool {
    if status.size_bytes >= config.segment_max_bytes {
        return true;
    }

    let is_active = status.idle_for < config.idle_threshold();
    if is_active
        && status.age >= config.rotation_time_active()
        && status.size_bytes >= config.min_rotation_bytes
    {
        return true;
    }
    if !is_active && status.age >= config.rotation_time_idle() {
        return true;
    }

    status.age >= config.force_rotation()
}

struct ActiveSegment {
    path: PathBuf,
    file: File,
    size: u64,
    created: SystemTime,
    last_write: SystemTime,
}

impl ActiveSegment {
    fn status(&self, now: SystemTime) -> SegmentStatus {
        SegmentStatus {
            size_bytes: self.size,
            age: now.duration_since(self.created).unwrap_or_default(),
            idle_for: now.duration_since(self.last_write).unwrap_or_default(),
        }
    }
}

struct TenantWal {
    dir: PathBuf,
    /// Serializes appends for this tenant; holds the open active-segment
    /// handle between appends, dropped on rotation.
    state: Mutex<Option<ActiveSegment>>,
}

/// Write-ahead log manager with per-tenant isolation.
pub struct WalManager {
    config: WalConfig,
    tenants: DashMap<String, Arc<TenantWal>>,
}

impl WalManager {
    pub fn new(config: WalConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.wal_root_path)
            .map_err(|e| GatewayError::Config(format!("cannot create WAL root: {e}")))?;
        info!(wal_root = %config.wal_root_path.display(), "WAL manager initialized");
        Ok(Self {
            config,
            tenants: DashMap::new(),
        })
    }

    pub fn config(&self) -> &WalConfig {
        &self.config
    }

    pub fn wal_root(&self) -> &Path {
        &self.config.wal_root_path
    }

    fn tenant(&self, token: &str) -> Arc<TenantWal> {
        self.tenants
            .entry(token.to_string())
            .or_insert_with(|| {
                Arc::new(TenantWal {
                    dir: self.config.wal_root_path.join(sanitize_token(token)),
                    state: Mutex::new(None),
                })
            })
            .clone()
    }

    /// Append masked entries to the tenant's active segment.
    ///
    /// Full frames or nothing: a failed write truncates the segment back
    /// to the last good offset before the error surfaces. Returns bytes
    /// written.
    pub async fn append(&self, token: &str, entries: &[Value]) -> Result<u64> {
        let tenant = self.tenant(token);
        let mut slot = tenant.state.lock().await;

        std::fs::create_dir_all(&tenant.dir)
            .map_err(|e| GatewayError::WalWrite(format!("cannot create tenant directory: {e}")))?;

        let mut frames = Vec::with_capacity(entries.len());
        let mut incoming = 0u64;
        for entry in entries {
            let payload = serde_json::to_vec(entry)
                .map_err(|e| GatewayError::WalWrite(format!("cannot serialize entry: {e}")))?;
            let frame = encode_frame(&payload);
            incoming += frame.len() as u64;
            frames.push(frame);
        }

        self.check_quota(&tenant.dir, incoming)?;
        self.ensure_active(&tenant.dir, &mut slot)?;

        let active = slot.as_mut().expect("active segment ensured above");
        match write_frames(active, &frames) {
            Ok(written) => {
                debug!(
                    token = %token_display(token),
                    segment = %active.path.display(),
                    entries = entries.len(),
                    bytes = written,
                    "appended records"
                );
                Ok(written)
            }
            Err(e) => {
                // Drop the handle; the next append reopens the segment
                // and re-truncates whatever the failed write left behind.
                *slot = None;
                Err(GatewayError::WalWrite(e))
            }
        }
    }

    /// Rotate the tenant's active segment now, if one exists. Returns
    /// the new ready path. The next append creates the successor segment.
    pub async fn rotate_active(&self, token: &str) -> Result<Option<PathBuf>> {
        let tenant = self.tenant(token);
        let mut slot = tenant.state.lock().await;

        let segments = scanner::list_segments(&tenant.dir)?;
        let Some(active) = segments.iter().rev().find(|s| s.state == SegmentState::Active) else {
            return Ok(None);
        };

        if slot.as_ref().map(|a| a.path == active.path).unwrap_or(false) {
            *slot = None;
        }
        let ready_path = rotate_segment(&active.path)?;
        Ok(Some(ready_path))
    }

    /// Ready segments for one tenant, or all tenants, oldest first.
    pub fn ready_segments(&self, token: Option<&str>) -> Result<Vec<SegmentInfo>> {
        let dir_name = token.map(sanitize_token);
        Ok(scanner::ready_segments(
            &self.config.wal_root_path,
            dir_name.as_deref(),
        )?)
    }

    /// Delete a forwarded segment. Idempotent.
    pub fn delete_segment(&self, path: &Path) -> Result<()> {
        Ok(scanner::delete_segment(path)?)
    }

    /// Per-tenant WAL statistics.
    pub fn stats(&self, token: &str) -> Result<WalStats> {
        let dir = self.config.wal_root_path.join(sanitize_token(token));
        Ok(scanner::tenant_stats(&dir)?)
    }

    fn check_quota(&self, dir: &Path, incoming: u64) -> Result<()> {
        let stats = scanner::tenant_stats(dir)?;
        if stats.disk_bytes + incoming > self.config.token_wal_quota_bytes {
            warn!(
                dir = %dir.display(),
                disk_bytes = stats.disk_bytes,
                incoming,
                quota = self.config.token_wal_quota_bytes,
                "disk quota exceeded"
            );
            return Err(GatewayError::QuotaExceeded { quota: "bytes" });
        }

        if let Some(oldest) = scanner::oldest_ready_modified(dir)? {
            let age = SystemTime::now().duration_since(oldest).unwrap_or_default();
            if age > self.config.quota_age() {
                warn!(
                    dir = %dir.display(),
                    age_secs = age.as_secs(),
                    "age quota exceeded, oldest ready segment too old"
                );
                return Err(GatewayError::QuotaExceeded { quota: "age" });
            }
        }
        Ok(())
    }

    /// Make sure `slot` holds an open, rotation-checked active segment.
    fn ensure_active(&self, dir: &Path, slot: &mut Option<ActiveSegment>) -> Result<()> {
        let segments = scanner::list_segments(dir)?;
        let next_sequence = segments.iter().map(|s| s.sequence).max().unwrap_or(0) + 1;

        let actives: Vec<&SegmentInfo> = segments
            .iter()
            .filter(|s| s.state == SegmentState::Active)
            .collect();
        if actives.len() > 1 {
            // Should be impossible while this process owns the tenant;
            // a crashed predecessor can leave one behind. Highest wins.
            warn!(dir = %dir.display(), count = actives.len(), "multiple active segments found");
        }

        let Some(on_disk) = actives.last().copied() else {
            *slot = Some(create_segment(dir, next_sequence)?);
            return Ok(());
        };

        let reuse = slot.as_ref().map(|a| a.path == on_disk.path).unwrap_or(false);
        if !reuse {
            *slot = Some(open_segment(on_disk)?);
        }

        let now = SystemTime::now();
        let status = slot.as_ref().expect("slot populated above").status(now);
        if should_rotate(&status, &self.config) {
            *slot = None;
            rotate_segment(&on_disk.path)?;
            *slot = Some(create_segment(dir, next_sequence)?);
        }
        Ok(())
    }
}

/// Write every frame or roll back to the pre-call offset. Readers must
/// only ever see complete frames from offset 0.
fn write_frames(
    active: &mut ActiveSegment,
    frames: &[bytes::BytesMut],
) -> std::result::Result<u64, String> {
    let mut written = 0u64;
    for frame in frames {
        if let Err(e) = active.file.write_all(frame) {
            let _ = active.file.set_len(active.size);
            return Err(format!("append failed: {e}"));
        }
        active.size += frame.len() as u64;
        written += frame.len() as u64;
    }
    active.last_write = SystemTime::now();
    Ok(written)
}

/// Rename `segment_NNN.wal` to `segment_NNN.ready`. The rename is the
/// writer/forwarder synchronization point and must happen before any
/// successor segment is created.
fn rotate_segment(active_path: &Path) -> Result<PathBuf> {
    let ready_path = active_path.with_extension("ready");
    std::fs::rename(active_path, &ready_path)
        .map_err(|e| GatewayError::WalWrite(format!("segment rotation failed: {e}")))?;
    info!(
        from = %active_path.display(),
        to = %ready_path.display(),
        "rotated segment"
    );
    Ok(ready_path)
}

fn create_segment(dir: &Path, sequence: u32) -> Result<ActiveSegment> {
    let path = dir.join(format!("segment_{sequence:03}.wal"));
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| GatewayError::WalWrite(format!("cannot create segment: {e}")))?;
    let now = SystemTime::now();
    info!(segment = %path.display(), "created segment");
    Ok(ActiveSegment {
        path,
        file,
        size: 0,
        created: now,
        last_write: now,
    })
}

fn open_segment(info: &SegmentInfo) -> Result<ActiveSegment> {
    // A partial frame from a crashed writer is cut off before the size
    // feeds the rotation check.
    let size = truncate_torn_tail(&info.path)
        .map_err(|e| GatewayError::WalWrite(format!("cannot recover segment: {e}")))?;
    let file = OpenOptions::new()
        .append(true)
        .open(&info.path)
        .map_err(|e| GatewayError::WalWrite(format!("cannot open segment: {e}")))?;
    Ok(ActiveSegment {
        path: info.path.clone(),
        file,
        size,
        created: info.created,
        last_write: info.modified,
    })
}
