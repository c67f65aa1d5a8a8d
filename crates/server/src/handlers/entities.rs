//! Entity resolution and artifact listing endpoints.

use crate::auth::require_auth;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Request, State};
use marquee_core::EntityKey;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;

/// GET /api/v1/{kind}/{id} - resolve an entity through the cache.
///
/// Wrapped in the per-request deadline: a cold resolve that cannot finish
/// its upstream fetch in time returns 504 rather than hanging the client.
pub async fn resolve_entity(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
    req: Request,
) -> ApiResult<Json<marquee_core::CachedEntity>> {
    require_auth(&req)?;
    let key = EntityKey::parse(&kind, &id)?;

    let resolved = tokio::time::timeout(
        state.config.server.request_timeout(),
        state.cache.resolve(key),
    )
    .await
    .map_err(|_| {
        crate::metrics::RESOLVES_TOTAL.with_label_values(&["timeout"]).inc();
        ApiError::UpstreamTimeout
    })?;

    let outcome = if resolved.is_ok() { "ok" } else { "error" };
    crate::metrics::RESOLVES_TOTAL.with_label_values(&[outcome]).inc();

    Ok(Json(resolved?))
}

/// One published artifact variant.
#[derive(Debug, Serialize)]
pub struct VariantResponse {
    pub asset_kind: String,
    pub size_class: String,
    pub width: i64,
    pub height: i64,
    pub byte_size: i64,
    pub format: String,
    pub storage_key: String,
    /// Publicly reachable URL when the storage backend has a base URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub processed_at: String,
}

/// Variant listing for one entity.
#[derive(Debug, Serialize)]
pub struct ArtifactListResponse {
    pub entity_kind: String,
    pub entity_id: i64,
    pub variants: Vec<VariantResponse>,
}

/// GET /api/v1/{kind}/{id}/artifacts - list published variants.
///
/// Image bytes are never proxied; clients fetch variants straight from the
/// storage backend via the returned URLs.
pub async fn list_artifacts(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
    req: Request,
) -> ApiResult<Json<ArtifactListResponse>> {
    require_auth(&req)?;
    let key = EntityKey::parse(&kind, &id)?;

    // Tombstoned entities are invisible here too.
    state
        .store
        .get_entry(key.kind.as_str(), key.id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("{key}")))?;

    let base_url = state
        .config
        .storage
        .public_base_url()
        .map(|base| base.trim_end_matches('/').to_string());

    let rows = state.store.get_variants(key.kind.as_str(), key.id).await?;
    let mut variants = Vec::with_capacity(rows.len());
    for row in rows {
        let processed_at = row
            .processed_at
            .format(&Rfc3339)
            .map_err(|e| ApiError::Internal(format!("failed to format timestamp: {e}")))?;
        variants.push(VariantResponse {
            url: base_url
                .as_ref()
                .map(|base| format!("{base}/{}", row.storage_key)),
            asset_kind: row.asset_kind,
            size_class: row.size_class,
            width: row.width,
            height: row.height,
            byte_size: row.byte_size,
            format: row.format,
            storage_key: row.storage_key,
            processed_at,
        });
    }

    Ok(Json(ArtifactListResponse {
        entity_kind: key.kind.as_str().to_string(),
        entity_id: key.id,
        variants,
    }))
}
