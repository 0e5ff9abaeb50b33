//! LogGate - Multi-Tenant Log Ingestion Gateway
//!
//! Accepts batched structured log entries over HTTP, masks sensitive
//! fields, persists them to a per-tenant write-ahead log, and forwards
//! durable records to a Loki-compatible backend with retries.

pub mod auth;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod health;
pub mod limiter;
pub mod masking;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod runtime;
pub mod scheduler;
pub mod server;
pub mod wal;

pub use config::Config;
pub use error::GatewayError;

/// LogGate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type alias for LogGate operations
pub type Result<T> = std::result::Result<T, GatewayError>;
