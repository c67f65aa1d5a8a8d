//! Liveness and readiness probes.

use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// GET /healthz - process liveness. Always 200 while the server runs.
pub async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        detail: None,
    })
}

/// GET /readyz - readiness: both the metadata store and object storage must
/// answer a health check.
pub async fn readyz(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    if let Err(err) = state.store.health_check().await {
        tracing::warn!(error = %err, "metadata store health check failed");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unavailable",
                detail: Some(format!("metadata store: {err}")),
            }),
        );
    }
    if let Err(err) = state.objects.health_check().await {
        tracing::warn!(error = %err, "object storage health check failed");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unavailable",
                detail: Some(format!("object storage: {err}")),
            }),
        );
    }

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            detail: None,
        }),
    )
}
