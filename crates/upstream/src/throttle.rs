//! Shared token-bucket throttle for upstream requests.
//!
//! Every outbound request, whether from a cache miss or a background sync
//! batch, passes through one process-wide limiter so the combined request
//! rate never exceeds the configured budget.

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Process-wide upstream request throttle.
#[derive(Clone)]
pub struct Throttle {
    limiter: Arc<DirectLimiter>,
}

impl Throttle {
    /// Create a throttle allowing `requests_per_second` sustained requests.
    ///
    /// A zero rate is clamped to one request per second.
    pub fn new(requests_per_second: u32) -> Self {
        let rate = NonZeroU32::new(requests_per_second.max(1))
            .unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(rate))),
        }
    }

    /// Wait until a request slot is available.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }

    /// Try to take a slot without waiting.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}
