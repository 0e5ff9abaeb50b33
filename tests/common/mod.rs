//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use loggate::auth::ApiKeyInfo;
use loggate::forwarder::{PushClient, PushError, PushPayload};
use loggate::Config;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

pub const TENANT_TOKEN: &str = "logstack_test_abcdef123456";
pub const ADMIN_TOKEN: &str = "admin_secret_token";

/// Downstream double: replays a script of outcomes, then accepts, and
/// records every payload it was sent.
pub struct RecordingClient {
    script: Mutex<VecDeque<Result<(), PushError>>>,
    pushes: Mutex<Vec<PushPayload>>,
}

impl RecordingClient {
    pub fn accepting() -> Arc<Self> {
        Self::scripted(Vec::new())
    }

    pub fn scripted(script: Vec<Result<(), PushError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            pushes: Mutex::new(Vec::new()),
        })
    }

    pub fn push_count(&self) -> usize {
        self.pushes.lock().len()
    }

    pub fn payloads(&self) -> Vec<PushPayload> {
        self.pushes.lock().clone()
    }
}

#[async_trait]
impl PushClient for RecordingClient {
    async fn push(&self, payload: &PushPayload) -> Result<(), PushError> {
        self.pushes.lock().push(payload.clone());
        self.script.lock().pop_front().unwrap_or(Ok(()))
    }
}

/// Config with one active tenant token, an admin token, a tempdir WAL
/// root and zeroed backoffs so retries do not slow the suite down.
pub fn test_config(wal_root: &Path) -> Config {
    let mut config = Config::default();
    config.auth.api_keys.insert(
        TENANT_TOKEN.to_string(),
        ApiKeyInfo {
            name: "test".to_string(),
            active: true,
            description: "integration test key".to_string(),
        },
    );
    config.auth.admin_token = ADMIN_TOKEN.to_string();
    config.wal.wal_root_path = wal_root.to_path_buf();
    config.downstream.backoff_seconds = vec![0];
    config.downstream.backoff_park_seconds = 0;
    config.downstream.forward_interval_seconds = 3600;
    config
}

/// Spawn a downstream double whose `/ready` endpoint answers 200, for
/// tests that need the readiness probe to pass. Returns its base URL.
pub async fn spawn_downstream_stub() -> String {
    let app = axum::Router::new().route(
        "/ready",
        axum::routing::get(|| async { axum::http::StatusCode::OK }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

pub fn log_entry(message: &str) -> Value {
    json!({
        "timestamp": "2025-01-01T00:00:00Z",
        "level": "INFO",
        "message": message,
        "service": "svc",
        "env": "prod"
    })
}

pub fn batch_body(entries: Vec<Value>) -> String {
    json!({ "entries": entries }).to_string()
}
