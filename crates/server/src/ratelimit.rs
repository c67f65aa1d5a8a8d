//! Per-credential rate limiting middleware.
//!
//! Each credential gets its own token-bucket limiter sized from its
//! per-minute quota plus the configured burst headroom. The limiter map is
//! bounded and stale entries are evicted by a background cleanup task, so an
//! attacker minting credentials cannot exhaust memory.

use crate::auth::AuthenticatedCredential;
use crate::error::ApiError;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::{DashMap, mapref::entry::Entry};
use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use marquee_core::config::RateLimitConfig;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use uuid::Uuid;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// One credential's limiter plus bookkeeping for eviction.
struct CredentialLimiter {
    limiter: DirectLimiter,
    /// Quota the limiter was built from; a changed credential quota
    /// replaces the limiter on the next check.
    per_minute: u32,
    last_access: Instant,
}

/// Rate limiter state shared across requests.
#[derive(Clone)]
pub struct RateLimitState {
    inner: Option<Arc<RateLimitStateInner>>,
}

struct RateLimitStateInner {
    limiters: DashMap<Uuid, CredentialLimiter>,
    config: RateLimitConfig,
    entry_ttl: Duration,
    /// Set once the map hits capacity, so the warning does not spam logs.
    at_capacity_warned: AtomicBool,
}

/// Error returned when a rate limit is exceeded.
#[derive(Debug)]
pub struct RateLimitExceeded {
    /// Seconds to wait before retrying.
    pub retry_after_secs: u64,
}

impl RateLimitState {
    /// Create rate limit state from configuration.
    pub fn new(config: &RateLimitConfig) -> Self {
        if !config.enabled {
            return Self { inner: None };
        }
        Self {
            inner: Some(Arc::new(RateLimitStateInner {
                limiters: DashMap::new(),
                entry_ttl: Duration::from_secs(config.entry_ttl_secs),
                config: config.clone(),
                at_capacity_warned: AtomicBool::new(false),
            })),
        }
    }

    /// Check if rate limiting is enabled.
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Check whether a request by this credential is allowed.
    ///
    /// `per_minute` of zero falls back to the configured default quota.
    pub fn check(&self, credential_id: Uuid, per_minute: u32) -> Result<(), RateLimitExceeded> {
        let Some(inner) = &self.inner else {
            return Ok(());
        };

        let per_minute = if per_minute == 0 {
            inner.config.default_requests_per_minute
        } else {
            per_minute
        };

        // len() can deadlock when called while holding an entry lock, so the
        // capacity check happens first. Slightly racy; the map can overshoot
        // by at most the number of concurrent inserters.
        let at_capacity = inner.limiters.len() >= inner.config.max_entries as usize;

        match inner.limiters.entry(credential_id) {
            Entry::Occupied(mut entry) => {
                let slot = entry.get_mut();
                if slot.per_minute != per_minute {
                    *slot = Self::build_limiter(&inner.config, per_minute);
                } else {
                    slot.last_access = Instant::now();
                }
                Self::check_limiter(&slot.limiter)
            }
            Entry::Vacant(entry) => {
                if at_capacity {
                    if !inner.at_capacity_warned.swap(true, Ordering::Relaxed) {
                        tracing::warn!(
                            max_entries = inner.config.max_entries,
                            "rate limiter at capacity, rejecting untracked credentials"
                        );
                    }
                    return Err(RateLimitExceeded {
                        retry_after_secs: 60,
                    });
                }
                let slot = entry.insert(Self::build_limiter(&inner.config, per_minute));
                Self::check_limiter(&slot.limiter)
            }
        }
    }

    fn build_limiter(config: &RateLimitConfig, per_minute: u32) -> CredentialLimiter {
        let quota = NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst_for(per_minute)).unwrap_or(NonZeroU32::MIN);
        CredentialLimiter {
            limiter: RateLimiter::direct(Quota::per_minute(quota).allow_burst(burst)),
            per_minute,
            last_access: Instant::now(),
        }
    }

    fn check_limiter(limiter: &DirectLimiter) -> Result<(), RateLimitExceeded> {
        match limiter.check() {
            Ok(()) => Ok(()),
            Err(not_until) => {
                let wait = not_until.wait_time_from(DefaultClock::default().now());
                Err(RateLimitExceeded {
                    retry_after_secs: wait.as_secs() + 1,
                })
            }
        }
    }

    /// Evict limiters that have not been touched within the entry TTL.
    /// Returns the number of entries removed.
    pub fn cleanup(&self) -> usize {
        let Some(inner) = &self.inner else {
            return 0;
        };
        let before = inner.limiters.len();
        let ttl = inner.entry_ttl;
        inner
            .limiters
            .retain(|_, slot| slot.last_access.elapsed() <= ttl);
        let evicted = before.saturating_sub(inner.limiters.len());
        if evicted > 0 {
            inner.at_capacity_warned.store(false, Ordering::Relaxed);
            tracing::debug!(
                evicted,
                remaining = inner.limiters.len(),
                "rate limiter cleanup evicted stale entries"
            );
        }
        evicted
    }

    /// Current number of tracked credentials.
    pub fn entry_count(&self) -> usize {
        self.inner.as_ref().map_or(0, |inner| inner.limiters.len())
    }
}

/// Per-credential rate limiting middleware. Runs after auth; unauthenticated
/// requests fall through (they can only reach open routes anyway).
pub async fn rate_limit_middleware(
    State(rate_limit): State<RateLimitState>,
    req: Request,
    next: Next,
) -> Response {
    if !rate_limit.is_enabled() {
        return next.run(req).await;
    }

    if let Some(auth) = req.extensions().get::<AuthenticatedCredential>() {
        let credential_id = *auth.credential.id.as_uuid();
        let per_minute = auth.credential.rate_limit_per_minute;
        if let Err(exceeded) = rate_limit.check(credential_id, per_minute) {
            crate::metrics::REQUESTS_RATE_LIMITED.inc();
            return ApiError::RateLimited {
                retry_after_secs: exceeded.retry_after_secs,
            }
            .into_response();
        }
    }

    next.run(req).await
}

/// Spawn a background task that periodically evicts stale limiter entries.
pub fn spawn_cleanup_task(
    state: RateLimitState,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            state.cleanup();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(default_per_minute: u32) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            default_requests_per_minute: default_per_minute,
            burst_percent: 15,
            max_entries: 1000,
            cleanup_interval_secs: 60,
            entry_ttl_secs: 300,
        }
    }

    #[test]
    fn test_disabled_always_allows() {
        let state = RateLimitState::new(&RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        });
        assert!(!state.is_enabled());
        for _ in 0..1000 {
            assert!(state.check(Uuid::new_v4(), 1).is_ok());
        }
    }

    #[test]
    fn test_burst_exhaustion_rejects_with_retry_after() {
        let state = RateLimitState::new(&config(100));
        let id = Uuid::new_v4();

        // 100/min quota with 15% headroom: 115 requests fit the burst.
        for i in 0..115 {
            assert!(state.check(id, 100).is_ok(), "request {i} should pass");
        }
        let rejected = state.check(id, 100).expect_err("116th should be rejected");
        assert!(rejected.retry_after_secs >= 1);
    }

    #[test]
    fn test_credentials_are_isolated() {
        let state = RateLimitState::new(&config(100));
        let first = Uuid::new_v4();
        for _ in 0..115 {
            state.check(first, 100).unwrap();
        }
        assert!(state.check(first, 100).is_err());
        assert!(state.check(Uuid::new_v4(), 100).is_ok());
    }

    #[test]
    fn test_zero_quota_uses_default() {
        let state = RateLimitState::new(&config(2));
        let id = Uuid::new_v4();
        // Default 2/min + 15% headroom rounds up to one extra slot: 3 total.
        assert!(state.check(id, 0).is_ok());
        assert!(state.check(id, 0).is_ok());
        assert!(state.check(id, 0).is_ok());
        assert!(state.check(id, 0).is_err());
    }

    #[test]
    fn test_quota_change_replaces_limiter() {
        let state = RateLimitState::new(&config(100));
        let id = Uuid::new_v4();
        for _ in 0..3 {
            state.check(id, 2).unwrap();
        }
        assert!(state.check(id, 2).is_err());
        // Raising the credential's quota takes effect immediately.
        assert!(state.check(id, 100).is_ok());
    }

    #[test]
    fn test_capacity_bound() {
        let mut cfg = config(100);
        cfg.max_entries = 3;
        let state = RateLimitState::new(&cfg);

        let tracked: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &tracked {
            assert!(state.check(*id, 100).is_ok());
        }
        assert!(state.check(Uuid::new_v4(), 100).is_err());
        // Known credentials keep working at capacity.
        assert!(state.check(tracked[0], 100).is_ok());
    }

    #[test]
    fn test_cleanup_evicts_stale_entries() {
        let mut cfg = config(100);
        cfg.entry_ttl_secs = 0;
        let state = RateLimitState::new(&cfg);

        state.check(Uuid::new_v4(), 100).unwrap();
        state.check(Uuid::new_v4(), 100).unwrap();
        assert_eq!(state.entry_count(), 2);

        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(state.cleanup(), 2);
        assert_eq!(state.entry_count(), 0);
    }
}
