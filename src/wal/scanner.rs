//! Segment directory enumeration and per-tenant usage accounting
//!
//! No in-memory registry of segments exists anywhere in the process:
//! the directory tree is the source of truth, so crash recovery and
//! steady-state reads share this code path.

use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

/// Lifecycle state of a segment file, encoded in its name suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// `.wal`: open for append by the owning tenant's writer
    Active,
    /// `.ready`: immutable, awaiting forwarding
    Ready,
}

/// Information about one segment file.
#[derive(Debug, Clone)]
pub struct SegmentInfo {
    pub path: PathBuf,
    /// Per-tenant monotonic sequence number from the file name
    pub sequence: u32,
    pub state: SegmentState,
    pub size_bytes: u64,
    pub created: SystemTime,
    pub modified: SystemTime,
}

/// Per-tenant WAL statistics.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct WalStats {
    pub active_segments: usize,
    pub ready_segments: usize,
    pub disk_bytes: u64,
}

/// Parse `segment_NNN.wal` / `segment_NNN.ready` names; anything else
/// in a tenant directory is ignored.
fn parse_segment_name(name: &str) -> Option<(u32, SegmentState)> {
    let rest = name.strip_prefix("segment_")?;
    let (digits, state) = if let Some(d) = rest.strip_suffix(".wal") {
        (d, SegmentState::Active)
    } else if let Some(d) = rest.strip_suffix(".ready") {
        (d, SegmentState::Ready)
    } else {
        return None;
    };
    digits.parse::<u32>().ok().map(|seq| (seq, state))
}

/// List every segment in a tenant directory, sorted by sequence number.
pub fn list_segments(token_dir: &Path) -> std::io::Result<Vec<SegmentInfo>> {
    let mut segments = Vec::new();
    if !token_dir.is_dir() {
        return Ok(segments);
    }

    for entry in std::fs::read_dir(token_dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some((sequence, state)) = parse_segment_name(name) else {
            continue;
        };
        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                // Raced with a concurrent delete; skip it.
                warn!(segment = %path.display(), error = %e, "failed to stat segment");
                continue;
            }
        };
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let created = metadata.created().unwrap_or(modified);
        segments.push(SegmentInfo {
            path,
            sequence,
            state,
            size_bytes: metadata.len(),
            created,
            modified,
        });
    }

    segments.sort_by_key(|s| s.sequence);
    Ok(segments)
}

/// Ready segments across the whole WAL root, or one tenant directory,
/// oldest first so queueing delay stays bounded.
pub fn ready_segments(wal_root: &Path, token_dir: Option<&str>) -> std::io::Result<Vec<SegmentInfo>> {
    let mut ready = Vec::new();

    if let Some(dir_name) = token_dir {
        collect_ready(&wal_root.join(dir_name), &mut ready)?;
    } else if wal_root.is_dir() {
        for entry in std::fs::read_dir(wal_root)? {
            let entry = entry?;
            if entry.path().is_dir() {
                collect_ready(&entry.path(), &mut ready)?;
            }
        }
    }

    ready.sort_by_key(|s| (s.modified, s.sequence));
    Ok(ready)
}

fn collect_ready(token_dir: &Path, out: &mut Vec<SegmentInfo>) -> std::io::Result<()> {
    for segment in list_segments(token_dir)? {
        if segment.state == SegmentState::Ready {
            out.push(segment);
        }
    }
    Ok(())
}

/// Aggregate statistics for one tenant directory.
pub fn tenant_stats(token_dir: &Path) -> std::io::Result<WalStats> {
    let mut stats = WalStats::default();
    for segment in list_segments(token_dir)? {
        match segment.state {
            SegmentState::Active => stats.active_segments += 1,
            SegmentState::Ready => stats.ready_segments += 1,
        }
        stats.disk_bytes += segment.size_bytes;
    }
    Ok(stats)
}

/// Modification time of the oldest ready segment, if any.
pub fn oldest_ready_modified(token_dir: &Path) -> std::io::Result<Option<SystemTime>> {
    let mut oldest = None;
    for segment in list_segments(token_dir)? {
        if segment.state == SegmentState::Ready {
            oldest = match oldest {
                None => Some(segment.modified),
                Some(current) if segment.modified < current => Some(segment.modified),
                keep => keep,
            };
        }
    }
    Ok(oldest)
}

/// Delete a segment after successful forwarding. Idempotent: a missing
/// file is not an error.
pub fn delete_segment(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            info!(segment = %path.display(), "deleted segment");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
