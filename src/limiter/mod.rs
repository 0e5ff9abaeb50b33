//! Per-tenant token bucket admission control
//!
//! One bucket per tenant, created on first consume. Calls against the
//! same bucket serialize on its mutex; different tenants never contend.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::auth::token_display;
use crate::error::GatewayError;
use crate::Result;

/// Rate limiting configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Sustained tokens per second per tenant
    pub rps: u32,
    /// Burst capacity per tenant
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rps: 2000,
            burst: 10000,
        }
    }
}

/// Token bucket state for one tenant.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, refill_rate: u32) -> Self {
        Self {
            capacity: capacity as f64,
            refill_rate: refill_rate as f64,
            tokens: capacity as f64,
            last_refill: Instant::now(),
        }
    }

    /// Refill whole tokens earned since the last refill, then try to
    /// take `n`. Returns false without taking anything if short.
    pub fn consume(&mut self, n: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        let earned = (elapsed * self.refill_rate).floor();
        self.tokens = (self.tokens + earned).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Seconds until one token becomes available, at least 1.
    pub fn retry_after_seconds(&self) -> u64 {
        let wait = ((1.0 - self.tokens) / self.refill_rate).ceil();
        if wait < 1.0 {
            1
        } else {
            wait as u64
        }
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }
}

/// Per-tenant rate limiter.
pub struct RateLimiter {
    buckets: DashMap<String, Arc<Mutex<TokenBucket>>>,
    rps: u32,
    burst: u32,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            rps: config.rps,
            burst: config.burst,
        }
    }

    fn bucket(&self, token: &str) -> Arc<Mutex<TokenBucket>> {
        self.buckets
            .entry(token.to_string())
            .or_insert_with(|| {
                debug!(
                    token = %token_display(token),
                    capacity = self.burst,
                    refill_rate = self.rps,
                    "creating rate limit bucket"
                );
                Arc::new(Mutex::new(TokenBucket::new(self.burst, self.rps)))
            })
            .clone()
    }

    /// Admit one request for the tenant or fail with `RateLimited`.
    pub fn check(&self, token: &str) -> Result<()> {
        let bucket = self.bucket(token);
        let mut bucket = bucket.lock();
        if bucket.consume(1.0) {
            Ok(())
        } else {
            let retry_after = bucket.retry_after_seconds();
            warn!(
                token = %token_display(token),
                retry_after,
                remaining_tokens = bucket.tokens(),
                "rate limit exceeded"
            );
            Err(GatewayError::RateLimited { retry_after })
        }
    }

    /// Consume `n` tokens; used by tests and bulk admission.
    pub fn consume(&self, token: &str, n: f64) -> bool {
        self.bucket(token).lock().consume(n)
    }

    /// Current token count for a tenant, if a bucket exists.
    pub fn tokens(&self, token: &str) -> Option<f64> {
        self.buckets.get(token).map(|b| b.lock().tokens())
    }

    pub fn active_buckets(&self) -> usize {
        self.buckets.len()
    }
}
