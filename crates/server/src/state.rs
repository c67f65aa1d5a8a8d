//! Application state shared across handlers.

use crate::auth::LivenessCache;
use crate::ratelimit::RateLimitState;
use marquee_cache::TieredCache;
use marquee_core::config::AppConfig;
use marquee_metadata::MetadataStore;
use marquee_storage::ObjectStore;
use marquee_sync::{ArtifactPipeline, SyncEngine};
use std::sync::Arc;
use std::time::Duration;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Durable metadata store.
    pub store: Arc<dyn MetadataStore>,
    /// Artifact object storage.
    pub objects: Arc<dyn ObjectStore>,
    /// Two-tier entity cache.
    pub cache: Arc<TieredCache>,
    /// Sync job engine.
    pub engine: Arc<SyncEngine>,
    /// Artifact processing pipeline.
    pub artifacts: Arc<ArtifactPipeline>,
    /// Per-credential rate limiting state.
    pub rate_limit: RateLimitState,
    /// Credential liveness cache for the auth middleware.
    pub liveness: Arc<LivenessCache>,
}

impl AppState {
    /// Create application state.
    ///
    /// # Panics
    ///
    /// Panics if the rate limit configuration is invalid; warnings are
    /// logged and tolerated.
    pub fn new(
        config: AppConfig,
        store: Arc<dyn MetadataStore>,
        objects: Arc<dyn ObjectStore>,
        cache: Arc<TieredCache>,
        engine: Arc<SyncEngine>,
        artifacts: Arc<ArtifactPipeline>,
    ) -> Self {
        match config.rate_limit.validate() {
            Ok(warnings) => {
                for warning in warnings {
                    tracing::warn!("configuration warning: {warning}");
                }
            }
            Err(error) => panic!("invalid rate limit configuration: {error}"),
        }

        let rate_limit = RateLimitState::new(&config.rate_limit);
        let liveness = Arc::new(LivenessCache::new(config.session.liveness_interval()));

        Self {
            config: Arc::new(config),
            store,
            objects,
            cache,
            engine,
            artifacts,
            rate_limit,
            liveness,
        }
    }

    /// Cleanup interval for the rate limiter, if enabled. A zero interval is
    /// coerced to 60 seconds so tokio's interval timer cannot panic.
    pub fn rate_limit_cleanup_interval(&self) -> Option<Duration> {
        if !self.rate_limit.is_enabled() {
            return None;
        }
        let secs = self.config.rate_limit.cleanup_interval_secs;
        if secs == 0 {
            tracing::warn!("rate_limit.cleanup_interval_secs is 0, using default of 60 seconds");
            Some(Duration::from_secs(60))
        } else {
            Some(Duration::from_secs(secs))
        }
    }
}
