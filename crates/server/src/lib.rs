//! HTTP server for the marquee metadata gateway.
//!
//! Exposes the authenticated resolve API, the admin surface for credentials
//! and sync jobs, and operational endpoints (health, readiness, metrics).

pub mod auth;
pub mod bootstrap;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod ratelimit;
pub mod routes;
pub mod session;
pub mod state;

pub use auth::{AuthenticatedCredential, TraceId};
pub use error::{ApiError, ApiResult};
pub use ratelimit::RateLimitState;
pub use routes::create_router;
pub use state::AppState;
