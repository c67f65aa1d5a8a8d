//! HTTP route definitions.

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::auth::auth_middleware;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::ratelimit::rate_limit_middleware;
use crate::state::AppState;

/// Build the application router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/v1/auth/login", post(handlers::login))
        .route("/api/v1/auth/whoami", get(handlers::whoami))
        .route("/api/v1/{kind}/{id}", get(handlers::resolve_entity))
        .route("/api/v1/{kind}/{id}/artifacts", get(handlers::list_artifacts))
        .route(
            "/api/v1/admin/credentials",
            post(handlers::create_credential).get(handlers::list_credentials),
        )
        .route(
            "/api/v1/admin/credentials/{id}",
            get(handlers::get_credential)
                .patch(handlers::update_credential)
                .delete(handlers::delete_credential),
        )
        .route("/api/v1/admin/sync", post(handlers::trigger_sync))
        .route("/api/v1/admin/jobs", get(handlers::list_jobs))
        .route("/api/v1/admin/jobs/{id}", get(handlers::get_job))
        .route(
            "/api/v1/admin/artifacts/failed",
            get(handlers::list_failed_artifacts),
        )
        .route(
            "/api/v1/admin/artifacts/backfill",
            post(handlers::backfill_artifacts),
        );

    let mut router = Router::new()
        .merge(api)
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz));

    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    // Layers run outermost-last: trace wraps auth wraps rate limiting, so the
    // rate limiter sees the authenticated credential in request extensions.
    router
        .layer(middleware::from_fn_with_state(
            state.rate_limit.clone(),
            rate_limit_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
