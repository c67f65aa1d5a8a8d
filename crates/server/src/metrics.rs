//! Prometheus metrics for the marquee server.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! When enabled, it MUST be network-restricted to authorized scraper IPs at
//! the infrastructure level.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{self, Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static LOGINS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("marquee_logins_total", "Login attempts by outcome"),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static REQUESTS_RATE_LIMITED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "marquee_requests_rate_limited_total",
        "Requests rejected by the per-credential rate limiter",
    )
    .expect("metric creation failed")
});

pub static RESOLVES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "marquee_resolves_total",
            "Entity resolve requests by outcome",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static SYNC_JOBS_TRIGGERED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "marquee_sync_jobs_triggered_total",
            "Admin-triggered sync jobs by kind",
        ),
        &["kind"],
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent; subsequent calls are no-ops, which keeps integration tests
/// that build multiple routers safe.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(LOGINS_TOTAL.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(REQUESTS_RATE_LIMITED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(RESOLVES_TOTAL.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SYNC_JOBS_TRIGGERED.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}
