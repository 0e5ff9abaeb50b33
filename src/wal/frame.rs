//! On-disk record frame format
//!
//! Frame layout: `<u32 length, little-endian><payload bytes><u32 crc32,
//! little-endian>`. The payload is one log entry as UTF-8 JSON; the CRC
//! covers the payload bytes only.

use bytes::{BufMut, BytesMut};
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;
use tracing::warn;

/// Bytes of framing around each payload (length prefix + checksum).
pub const FRAME_OVERHEAD: usize = 8;

/// Sanity bound on a frame's payload length. Entries are validated far
/// below this; a larger value in a length prefix means a corrupt or
/// misaligned tail.
const PAYLOAD_SANITY_MAX: usize = 10 * 1024 * 1024;

/// Encode one payload into a complete frame.
pub fn encode_frame(payload: &[u8]) -> BytesMut {
    let mut frame = BytesMut::with_capacity(FRAME_OVERHEAD + payload.len());
    frame.put_u32_le(payload.len() as u32);
    frame.put_slice(payload);
    frame.put_u32_le(crc32fast::hash(payload));
    frame
}

/// Result of scanning a segment file.
#[derive(Debug, Default)]
pub struct SegmentScan {
    /// Payloads of records that passed CRC validation, in write order
    pub records: Vec<Vec<u8>>,
    /// Complete frames whose checksum did not match (skipped)
    pub corrupt_records: usize,
    /// Byte offset just past the last complete frame
    pub valid_len: u64,
    /// A short read ended the scan before a frame completed
    pub truncated_tail: bool,
}

/// Scan every record frame in a segment.
///
/// CRC mismatches are logged and skipped; a short read (tail-torn write)
/// stops the scan without failing it.
pub fn scan_segment(path: &Path) -> std::io::Result<SegmentScan> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut scan = SegmentScan::default();

    loop {
        let mut len_bytes = [0u8; 4];
        match read_exact_or_eof(&mut reader, &mut len_bytes) {
            ReadOutcome::Full => {}
            ReadOutcome::Eof => break,
            ReadOutcome::Short => {
                scan.truncated_tail = true;
                break;
            }
        }

        let payload_len = u32::from_le_bytes(len_bytes) as usize;
        if payload_len > PAYLOAD_SANITY_MAX {
            warn!(
                segment = %path.display(),
                offset = scan.valid_len,
                payload_len,
                "implausible frame length, treating tail as torn"
            );
            scan.truncated_tail = true;
            break;
        }

        let mut payload = vec![0u8; payload_len];
        if !matches!(read_exact_or_eof(&mut reader, &mut payload), ReadOutcome::Full) {
            scan.truncated_tail = true;
            break;
        }

        let mut crc_bytes = [0u8; 4];
        if !matches!(read_exact_or_eof(&mut reader, &mut crc_bytes), ReadOutcome::Full) {
            scan.truncated_tail = true;
            break;
        }

        let stored_crc = u32::from_le_bytes(crc_bytes);
        let computed_crc = crc32fast::hash(&payload);
        scan.valid_len += (FRAME_OVERHEAD + payload_len) as u64;

        if stored_crc == computed_crc {
            scan.records.push(payload);
        } else {
            warn!(
                segment = %path.display(),
                offset = scan.valid_len,
                stored_crc,
                computed_crc,
                "CRC mismatch, skipping record"
            );
            scan.corrupt_records += 1;
        }
    }

    Ok(scan)
}

/// Truncate a torn partial frame off the end of a segment, if present.
/// Returns the resulting (valid) length.
pub fn truncate_torn_tail(path: &Path) -> std::io::Result<u64> {
    let scan = scan_segment(path)?;
    let actual_len = std::fs::metadata(path)?.len();
    if scan.truncated_tail && scan.valid_len < actual_len {
        warn!(
            segment = %path.display(),
            actual_len,
            valid_len = scan.valid_len,
            "truncating torn tail"
        );
        let file = std::fs::OpenOptions::new().write(true).open(path)?;
        file.set_len(scan.valid_len)?;
    }
    Ok(scan.valid_len.min(actual_len))
}

enum ReadOutcome {
    Full,
    Eof,
    Short,
}

fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> ReadOutcome {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return if filled == 0 {
                    ReadOutcome::Eof
                } else {
                    ReadOutcome::Short
                };
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) => return ReadOutcome::Short,
        }
    }
    ReadOutcome::Full
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_segment(dir: &TempDir, name: &str, frames: &[&[u8]]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        for payload in frames {
            file.write_all(&encode_frame(payload)).unwrap();
        }
        path
    }

    #[test]
    fn test_scan_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = write_segment(&dir, "segment_001.wal", &[b"one", b"two", b"three"]);

        let scan = scan_segment(&path).unwrap();
        assert_eq!(scan.records, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
        assert_eq!(scan.corrupt_records, 0);
        assert!(!scan.truncated_tail);
        assert_eq!(scan.valid_len, std::fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn test_corrupt_record_is_skipped_not_fatal() {
        let dir = TempDir::new().unwrap();
        let path = write_segment(&dir, "segment_001.wal", &[b"first", b"second", b"third"]);

        // Flip a payload byte inside the middle record.
        let mut bytes = std::fs::read(&path).unwrap();
        let middle_payload_offset = (FRAME_OVERHEAD + 5) + 4;
        bytes[middle_payload_offset] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let scan = scan_segment(&path).unwrap();
        assert_eq!(scan.records, vec![b"first".to_vec(), b"third".to_vec()]);
        assert_eq!(scan.corrupt_records, 1);
        assert!(!scan.truncated_tail);
    }

    #[test]
    fn test_torn_tail_stops_scan() {
        let dir = TempDir::new().unwrap();
        let path = write_segment(&dir, "segment_001.wal", &[b"complete"]);

        // Append half a frame.
        let torn = encode_frame(b"torn-record");
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&torn[..torn.len() / 2]).unwrap();
        drop(file);

        let scan = scan_segment(&path).unwrap();
        assert_eq!(scan.records, vec![b"complete".to_vec()]);
        assert!(scan.truncated_tail);
        assert_eq!(scan.valid_len, (FRAME_OVERHEAD + 8) as u64);
    }

    #[test]
    fn test_truncate_torn_tail() {
        let dir = TempDir::new().unwrap();
        let path = write_segment(&dir, "segment_001.wal", &[b"keep-me"]);
        let good_len = std::fs::metadata(&path).unwrap().len();

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[9, 0, 0, 0, b'x']).unwrap();
        drop(file);

        let valid = truncate_torn_tail(&path).unwrap();
        assert_eq!(valid, good_len);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);

        // Idempotent on a clean segment.
        assert_eq!(truncate_torn_tail(&path).unwrap(), good_len);
    }

    #[test]
    fn test_empty_segment_scans_clean() {
        let dir = TempDir::new().unwrap();
        let path = write_segment(&dir, "segment_001.wal", &[]);
        let scan = scan_segment(&path).unwrap();
        assert!(scan.records.is_empty());
        assert!(!scan.truncated_tail);
        assert_eq!(scan.valid_len, 0);
    }

    #[test]
    fn test_implausible_length_treated_as_torn() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("segment_001.wal");
        let mut file = File::create(&path).unwrap();
        file.write_all(&encode_frame(b"ok")).unwrap();
        file.write_all(&u32::MAX.to_le_bytes()).unwrap();
        drop(file);

        let scan = scan_segment(&path).unwrap();
        assert_eq!(scan.records, vec![b"ok".to_vec()]);
        assert!(scan.truncated_tail);
    }
}
