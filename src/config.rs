//! Configuration management for LogGate
//!
//! Loaded from `config/default.toml` when present, with `LOGGATE_*`
//! environment overrides on top. Sections that fail validation fall
//! back to their defaults rather than aborting startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::auth::AuthConfig;
use crate::forwarder::DownstreamConfig;
use crate::limiter::RateLimitConfig;
use crate::masking::MaskingConfig;
use crate::wal::WalConfig;

/// LogGate configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings
    pub server: ServerConfig,
    /// Logging settings
    pub logging: LoggingConfig,
    /// Authentication settings
    pub auth: AuthConfig,
    /// Per-tenant rate limiting settings
    pub rate_limit: RateLimitConfig,
    /// Sensitive field masking settings
    pub masking: MaskingConfig,
    /// Write-ahead log settings
    pub wal: WalConfig,
    /// Downstream push settings
    pub downstream: DownstreamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default file location or use defaults.
    pub async fn load() -> anyhow::Result<Self> {
        Self::load_from(Path::new("config/default.toml")).await
    }

    /// Load configuration from a specific file, falling back to defaults
    /// when the file does not exist.
    pub async fn load_from(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path).await?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        config.apply_env_overrides();

        if let Err(e) = config.validate_logging() {
            eprintln!("Invalid logging configuration: {e}");
            config.logging = LoggingConfig::default();
        }
        if let Err(e) = config.validate_rate_limit() {
            eprintln!("Invalid rate limit configuration: {e}");
            config.rate_limit = RateLimitConfig::default();
        }
        if let Err(e) = config.validate_wal() {
            eprintln!("Invalid WAL configuration: {e}");
            let wal_root_path = config.wal.wal_root_path.clone();
            config.wal = WalConfig {
                wal_root_path,
                ..Default::default()
            };
        }
        if let Err(e) = config.validate_downstream() {
            eprintln!("Invalid downstream configuration: {e}");
            config.downstream = DownstreamConfig::default();
        }

        Ok(config)
    }

    /// Address the HTTP server binds to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("LOGGATE_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("LOGGATE_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(level) = std::env::var("LOGGATE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("LOGGATE_LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Ok(wal_root) = std::env::var("LOGGATE_WAL_ROOT") {
            self.wal.wal_root_path = PathBuf::from(wal_root);
        }
        if let Ok(base_url) = std::env::var("LOGGATE_DOWNSTREAM_BASE_URL") {
            self.downstream.base_url = base_url;
        }
        if let Ok(rps) = std::env::var("LOGGATE_RATE_LIMIT_RPS") {
            if let Ok(rps) = rps.parse::<u32>() {
                self.rate_limit.rps = rps;
            }
        }
        if let Ok(burst) = std::env::var("LOGGATE_RATE_LIMIT_BURST") {
            if let Ok(burst) = burst.parse::<u32>() {
                self.rate_limit.burst = burst;
            }
        }
        if let Ok(admin_token) = std::env::var("LOGGATE_ADMIN_TOKEN") {
            self.auth.admin_token = admin_token;
        }
        if let Ok(api_keys) = std::env::var("LOGGATE_API_KEYS") {
            match serde_json::from_str(&api_keys) {
                Ok(keys) => self.auth.api_keys = keys,
                Err(e) => eprintln!("Ignoring LOGGATE_API_KEYS, not valid JSON: {e}"),
            }
        }
    }

    fn validate_logging(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "invalid log level '{}', valid: {valid_levels:?}",
                self.logging.level
            ));
        }
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(format!(
                "invalid log format '{}', valid: {valid_formats:?}",
                self.logging.format
            ));
        }
        Ok(())
    }

    fn validate_rate_limit(&self) -> Result<(), String> {
        if self.rate_limit.rps == 0 {
            return Err("rps must be greater than 0".to_string());
        }
        if self.rate_limit.burst == 0 {
            return Err("burst must be greater than 0".to_string());
        }
        Ok(())
    }

    fn validate_wal(&self) -> Result<(), String> {
        if self.wal.segment_max_bytes < self.wal.min_rotation_bytes {
            return Err("segment_max_bytes must be at least min_rotation_bytes".to_string());
        }
        if self.wal.token_wal_quota_bytes == 0 {
            return Err("token_wal_quota_bytes must be greater than 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.wal.disk_free_min_ratio) {
            return Err("disk_free_min_ratio must be between 0 and 1".to_string());
        }
        Ok(())
    }

    fn validate_downstream(&self) -> Result<(), String> {
        if self.downstream.base_url.is_empty() {
            return Err("base_url must not be empty".to_string());
        }
        if self.downstream.timeout_seconds == 0 {
            return Err("timeout_seconds must be greater than 0".to_string());
        }
        if self.downstream.batch_max_entries == 0 {
            return Err("batch_max_entries must be greater than 0".to_string());
        }
        if self.downstream.forward_interval_seconds == 0 {
            return Err("forward_interval_seconds must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Save configuration to a file.
    pub async fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }
}
