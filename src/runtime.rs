//! Process-wide component wiring
//!
//! One `Runtime` value is built at startup and passed into everything
//! that needs it; no component reaches for hidden global state.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::auth::ApiKeyRegistry;
use crate::config::Config;
use crate::forwarder::{Forwarder, LokiClient, PushClient};
use crate::health::HealthChecker;
use crate::limiter::RateLimiter;
use crate::masking::MaskingEngine;
use crate::metrics::MetricsCollector;
use crate::pipeline::IngestPipeline;
use crate::scheduler::ForwarderService;
use crate::wal::WalManager;
use crate::Result;

pub struct Runtime {
    pub config: Config,
    pub auth: ApiKeyRegistry,
    pub limiter: Arc<RateLimiter>,
    pub masking: Arc<MaskingEngine>,
    pub wal: Arc<WalManager>,
    pub pipeline: IngestPipeline,
    pub forwarder_service: Arc<ForwarderService>,
    pub health: HealthChecker,
    pub metrics: Arc<MetricsCollector>,
}

impl Runtime {
    /// Build the full runtime with the production push client.
    pub fn build(config: Config) -> Result<Arc<Self>> {
        let client = Arc::new(LokiClient::new(&config.downstream)?);
        Self::build_with_client(config, client)
    }

    /// Build the runtime against an arbitrary push transport; tests use
    /// this to swap in a scripted downstream.
    pub fn build_with_client(config: Config, client: Arc<dyn PushClient>) -> Result<Arc<Self>> {
        let metrics = Arc::new(MetricsCollector::new());
        let auth = ApiKeyRegistry::new(&config.auth);
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        let masking = Arc::new(MaskingEngine::new(&config.masking));
        let wal = Arc::new(WalManager::new(config.wal.clone())?);

        let forwarder = Arc::new(Forwarder::new(
            wal.clone(),
            client,
            config.downstream.clone(),
            metrics.clone(),
        ));
        let forwarder_service = Arc::new(ForwarderService::new(
            forwarder,
            Duration::from_secs(config.downstream.forward_interval_seconds),
        ));

        let pipeline = IngestPipeline::new(
            limiter.clone(),
            masking.clone(),
            wal.clone(),
            metrics.clone(),
        );
        let health = HealthChecker::new(
            wal.wal_root(),
            config.wal.disk_free_min_ratio,
            &config.downstream,
        )?;

        info!(
            api_keys = auth.key_count(),
            wal_root = %wal.wal_root().display(),
            "runtime assembled"
        );

        Ok(Arc::new(Self {
            config,
            auth,
            limiter,
            masking,
            wal,
            pipeline,
            forwarder_service,
            health,
            metrics,
        }))
    }

    /// Start background services.
    pub fn start(&self) {
        self.forwarder_service.start();
    }

    /// Stop background services, letting the in-flight forwarder cycle
    /// finish.
    pub async fn shutdown(&self) {
        self.forwarder_service.stop().await;
        info!("runtime shut down");
    }
}
