//! Bearer token authentication against the configured API key set

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::Result;

/// Metadata attached to a configured API key.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ApiKeyInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub description: String,
}

/// Authentication configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Valid producer tokens with metadata
    #[serde(default)]
    pub api_keys: HashMap<String, ApiKeyInfo>,
    /// Token accepted on admin routes
    #[serde(default)]
    pub admin_token: String,
}

/// Validates bearer tokens against the configured key set.
///
/// The registry is read-only after load; tenants are discovered on first
/// authenticated request and identified by their raw token everywhere else.
pub struct ApiKeyRegistry {
    keys: HashMap<String, ApiKeyInfo>,
    admin_token: String,
}

impl ApiKeyRegistry {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            keys: config.api_keys.clone(),
            admin_token: config.admin_token.clone(),
        }
    }

    /// Authenticate a producer token. Missing token is distinguished from
    /// an unknown or inactive one.
    pub fn authenticate(&self, token: Option<&str>) -> Result<String> {
        let token = match token {
            Some(t) if !t.trim().is_empty() => t.trim(),
            _ => {
                debug!("authentication required but no token provided");
                return Err(GatewayError::MissingAuth);
            }
        };

        match self.keys.get(token) {
            Some(info) if info.active => {
                debug!(token = %token_display(token), key_name = %info.name, "token authenticated");
                Ok(token.to_string())
            }
            Some(info) => {
                warn!(token = %token_display(token), key_name = %info.name, "authentication failed: inactive token");
                Err(GatewayError::Auth)
            }
            None => {
                warn!(token = %token_display(token), "authentication failed: unknown token");
                Err(GatewayError::Auth)
            }
        }
    }

    /// Authenticate the admin token for flush and status routes.
    pub fn authenticate_admin(&self, token: Option<&str>) -> Result<()> {
        let token = match token {
            Some(t) if !t.trim().is_empty() => t.trim(),
            _ => return Err(GatewayError::MissingAuth),
        };
        if self.admin_token.is_empty() || token != self.admin_token {
            warn!(token = %token_display(token), "admin authentication failed");
            return Err(GatewayError::Auth);
        }
        Ok(())
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }
}

/// Truncated token for log output; never log a full bearer token.
pub fn token_display(token: &str) -> String {
    let prefix: String = token.chars().take(8).collect();
    format!("{prefix}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ApiKeyRegistry {
        let mut api_keys = HashMap::new();
        api_keys.insert(
            "logstack_web_abc123".to_string(),
            ApiKeyInfo {
                name: "web".to_string(),
                active: true,
                description: "web frontend".to_string(),
            },
        );
        api_keys.insert(
            "logstack_old_def456".to_string(),
            ApiKeyInfo {
                name: "old".to_string(),
                active: false,
                description: String::new(),
            },
        );
        ApiKeyRegistry::new(&AuthConfig {
            api_keys,
            admin_token: "admin_secret".to_string(),
        })
    }

    #[test]
    fn test_valid_token_authenticates() {
        let reg = registry();
        let token = reg.authenticate(Some("logstack_web_abc123")).unwrap();
        assert_eq!(token, "logstack_web_abc123");
    }

    #[test]
    fn test_unknown_token_rejected() {
        let reg = registry();
        assert!(matches!(
            reg.authenticate(Some("nope")),
            Err(GatewayError::Auth)
        ));
    }

    #[test]
    fn test_inactive_token_rejected() {
        let reg = registry();
        assert!(matches!(
            reg.authenticate(Some("logstack_old_def456")),
            Err(GatewayError::Auth)
        ));
    }

    #[test]
    fn test_missing_token_is_forbidden() {
        let reg = registry();
        assert!(matches!(
            reg.authenticate(None),
            Err(GatewayError::MissingAuth)
        ));
        assert!(matches!(
            reg.authenticate(Some("   ")),
            Err(GatewayError::MissingAuth)
        ));
    }

    #[test]
    fn test_admin_token() {
        let reg = registry();
        assert!(reg.authenticate_admin(Some("admin_secret")).is_ok());
        assert!(reg.authenticate_admin(Some("wrong")).is_err());
        assert!(reg.authenticate_admin(None).is_err());
    }

    #[test]
    fn test_empty_admin_token_rejects_everything() {
        let reg = ApiKeyRegistry::new(&AuthConfig::default());
        assert!(reg.authenticate_admin(Some("")).is_err());
        assert!(reg.authenticate_admin(Some("anything")).is_err());
    }

    #[test]
    fn test_token_display_truncates() {
        assert_eq!(token_display("logstack_web_abc123"), "logstack...");
        assert_eq!(token_display("ab"), "ab...");
    }
}
