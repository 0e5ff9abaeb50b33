//! Per-tenant write-ahead log with adaptive segment rotation

pub mod frame;
pub mod manager;
pub mod scanner;

pub use frame::{encode_frame, scan_segment, truncate_torn_tail, SegmentScan, FRAME_OVERHEAD};
pub use manager::{sanitize_token, should_rotate, SegmentStatus, WalConfig, WalManager};
pub use scanner::{delete_segment, SegmentInfo, SegmentState, WalStats};
