//! Admin endpoints: credential management, sync triggers, job inspection.
//!
//! Every handler here requires an admin credential.

use crate::auth::require_admin;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use marquee_core::credential::{
    CreateCredentialRequest, CreateCredentialResponse, Credential, CredentialId,
    UpdateCredentialRequest,
};
use marquee_core::secret::{SecretHash, generate_secret};
use marquee_core::{EntityKey, EntityKind};
use marquee_metadata::models::{ArtifactJobRow, CredentialRow, SyncJobRow};
use marquee_metadata::repos::SyncJobKind;
use marquee_sync::scheduler;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

fn format_ts(ts: OffsetDateTime) -> ApiResult<String> {
    ts.format(&Rfc3339)
        .map_err(|e| ApiError::Internal(format!("failed to format timestamp: {e}")))
}

fn format_opt_ts(ts: Option<OffsetDateTime>) -> ApiResult<Option<String>> {
    ts.map(format_ts).transpose()
}

// --- credentials -----------------------------------------------------------

/// Credential listing entry. Hashes never leave the store.
#[derive(Debug, Serialize)]
pub struct CredentialSummary {
    pub credential_id: String,
    pub key_preview: String,
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
    pub admin: bool,
    pub rate_limit_per_minute: u32,
    pub expires_at: Option<String>,
    pub last_used_at: Option<String>,
    pub total_requests: i64,
    pub created_at: String,
}

impl CredentialSummary {
    fn from_credential(credential: &Credential) -> ApiResult<Self> {
        Ok(Self {
            credential_id: credential.id.to_string(),
            key_preview: credential.key_preview(),
            name: credential.name.clone(),
            description: credential.description.clone(),
            active: credential.active,
            admin: credential.admin,
            rate_limit_per_minute: credential.rate_limit_per_minute,
            expires_at: format_opt_ts(credential.expires_at)?,
            last_used_at: format_opt_ts(credential.last_used_at)?,
            total_requests: credential.total_requests,
            created_at: format_ts(credential.created_at)?,
        })
    }
}

/// POST /api/v1/admin/credentials - create a credential.
///
/// The plaintext secret appears in the response exactly once.
pub async fn create_credential(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<CreateCredentialResponse>)> {
    let auth = require_admin(&req)?;
    let created_by = auth.credential.name.clone();

    let body: CreateCredentialRequest = parse_body(req).await?;
    if body.name.trim().is_empty() {
        return Err(ApiError::Validation("name cannot be empty".to_string()));
    }

    let now = OffsetDateTime::now_utc();
    let secret = generate_secret();
    let credential = Credential {
        id: CredentialId::new(),
        key_id: format!("mq_k_{}", Uuid::new_v4().simple()),
        name: body.name,
        description: body.description,
        secret: SecretHash::new(&secret),
        pin: body.pin.as_deref().map(SecretHash::new),
        active: true,
        admin: body.admin,
        rate_limit_per_minute: body
            .rate_limit_per_minute
            .unwrap_or(state.config.rate_limit.default_requests_per_minute),
        expires_at: body
            .expires_in
            .map(|secs| now + time::Duration::seconds(secs as i64)),
        last_used_at: None,
        total_requests: 0,
        created_by: Some(created_by),
        created_at: now,
    };

    state
        .store
        .create_credential(&CredentialRow::from_credential(&credential))
        .await?;
    tracing::info!(credential_id = %credential.id, name = %credential.name, "credential created");

    let response = CreateCredentialResponse {
        credential_id: credential.id.to_string(),
        key_id: credential.key_id.clone(),
        secret,
        key_preview: credential.key_preview(),
        expires_at: format_opt_ts(credential.expires_at)?,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /api/v1/admin/credentials - list credentials, newest first.
pub async fn list_credentials(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<Vec<CredentialSummary>>> {
    require_admin(&req)?;

    let rows = state.store.list_credentials().await?;
    let mut summaries = Vec::with_capacity(rows.len());
    for row in rows {
        summaries.push(CredentialSummary::from_credential(&row.into_credential())?);
    }
    Ok(Json(summaries))
}

/// GET /api/v1/admin/credentials/{id}.
pub async fn get_credential(
    State(state): State<AppState>,
    Path(credential_id): Path<Uuid>,
    req: Request,
) -> ApiResult<Json<CredentialSummary>> {
    require_admin(&req)?;

    let row = state
        .store
        .get_credential(credential_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("credential {credential_id}")))?;
    Ok(Json(CredentialSummary::from_credential(
        &row.into_credential(),
    )?))
}

/// PATCH /api/v1/admin/credentials/{id} - update mutable fields.
///
/// Revocation is `active=false` here; it takes effect for in-flight session
/// tokens within one liveness interval.
pub async fn update_credential(
    State(state): State<AppState>,
    Path(credential_id): Path<Uuid>,
    req: Request,
) -> ApiResult<Json<CredentialSummary>> {
    require_admin(&req)?;
    let body: UpdateCredentialRequest = parse_body(req).await?;

    let row = state
        .store
        .get_credential(credential_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("credential {credential_id}")))?;
    let mut credential = row.into_credential();

    if let Some(name) = body.name {
        if name.trim().is_empty() {
            return Err(ApiError::Validation("name cannot be empty".to_string()));
        }
        credential.name = name;
    }
    if let Some(description) = body.description {
        credential.description = Some(description);
    }
    if let Some(active) = body.active {
        credential.active = active;
    }
    if let Some(limit) = body.rate_limit_per_minute {
        credential.rate_limit_per_minute = limit;
    }
    if let Some(expires_in) = body.expires_in {
        credential.expires_at = if expires_in == 0 {
            None
        } else {
            Some(OffsetDateTime::now_utc() + time::Duration::seconds(expires_in as i64))
        };
    }

    state
        .store
        .update_credential(&CredentialRow::from_credential(&credential))
        .await?;
    // Make the change visible to the auth path right away.
    state.liveness.forget(&credential_id);
    tracing::info!(credential_id = %credential_id, active = credential.active, "credential updated");

    Ok(Json(CredentialSummary::from_credential(&credential)?))
}

/// DELETE /api/v1/admin/credentials/{id}.
pub async fn delete_credential(
    State(state): State<AppState>,
    Path(credential_id): Path<Uuid>,
    req: Request,
) -> ApiResult<StatusCode> {
    let auth = require_admin(&req)?;
    if *auth.credential.id.as_uuid() == credential_id {
        return Err(ApiError::Validation(
            "cannot delete the credential used for this request".to_string(),
        ));
    }

    state.store.delete_credential(credential_id).await?;
    state.liveness.forget(&credential_id);
    tracing::info!(credential_id = %credential_id, "credential deleted");
    Ok(StatusCode::NO_CONTENT)
}

// --- sync jobs -------------------------------------------------------------

/// Sync trigger request.
#[derive(Debug, Deserialize)]
pub struct TriggerSyncRequest {
    /// Job kind: full, incremental, targeted or cleanup.
    pub kind: String,
    /// Required for targeted jobs.
    #[serde(default)]
    pub entity_kind: Option<String>,
    #[serde(default)]
    pub entity_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TriggerSyncResponse {
    pub job_id: String,
}

/// POST /api/v1/admin/sync - enqueue and start a sync job.
///
/// A duplicate of an already active kind is rejected with 409; targeted
/// jobs are exempt from the mutex.
pub async fn trigger_sync(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<TriggerSyncResponse>)> {
    require_admin(&req)?;
    let body: TriggerSyncRequest = parse_body(req).await?;

    let kind = SyncJobKind::parse(&body.kind)
        .ok_or_else(|| ApiError::Validation(format!("unknown sync kind: {}", body.kind)))?;

    let target = match (kind, &body.entity_kind, body.entity_id) {
        (SyncJobKind::Targeted, Some(entity_kind), Some(entity_id)) => {
            let entity_kind = EntityKind::parse(entity_kind)?;
            Some(EntityKey::new(entity_kind, entity_id))
        }
        (SyncJobKind::Targeted, _, _) => {
            return Err(ApiError::Validation(
                "targeted sync requires entity_kind and entity_id".to_string(),
            ));
        }
        _ => None,
    };

    let job_id = state.engine.enqueue(kind, target).await?;
    scheduler::spawn_job(state.engine.clone(), state.store.clone(), job_id);
    crate::metrics::SYNC_JOBS_TRIGGERED
        .with_label_values(&[kind.as_str()])
        .inc();
    tracing::info!(job_id = %job_id, kind = %body.kind, "sync job triggered");

    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerSyncResponse {
            job_id: job_id.to_string(),
        }),
    ))
}

/// Sync job as returned by the admin API.
#[derive(Debug, Serialize)]
pub struct SyncJobResponse {
    pub job_id: String,
    pub kind: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncJobResponse {
    fn from_row(row: SyncJobRow) -> ApiResult<Self> {
        let target = match (&row.target_kind, row.target_id) {
            (Some(kind), Some(id)) => Some(format!("{kind}/{id}")),
            _ => None,
        };
        Ok(Self {
            job_id: row.job_id.to_string(),
            kind: row.job_kind,
            state: row.state,
            target,
            created_at: format_ts(row.created_at)?,
            started_at: format_opt_ts(row.started_at)?,
            finished_at: format_opt_ts(row.finished_at)?,
            stats: row.stats.as_deref().and_then(|s| serde_json::from_str(s).ok()),
            error: row.error,
        })
    }
}

/// Query parameters for job listings.
#[derive(Debug, Deserialize)]
pub struct ListLimit {
    #[serde(default = "default_list_limit")]
    pub limit: u32,
}

fn default_list_limit() -> u32 {
    50
}

/// GET /api/v1/admin/jobs - recent sync jobs.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListLimit>,
    req: Request,
) -> ApiResult<Json<Vec<SyncJobResponse>>> {
    require_admin(&req)?;

    let rows = state
        .store
        .get_recent_sync_jobs(params.limit.min(500))
        .await?;
    let mut jobs = Vec::with_capacity(rows.len());
    for row in rows {
        jobs.push(SyncJobResponse::from_row(row)?);
    }
    Ok(Json(jobs))
}

/// GET /api/v1/admin/jobs/{id}.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    req: Request,
) -> ApiResult<Json<SyncJobResponse>> {
    require_admin(&req)?;

    let row = state
        .store
        .get_sync_job(job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("sync job {job_id}")))?;
    Ok(Json(SyncJobResponse::from_row(row)?))
}

// --- artifacts -------------------------------------------------------------

/// Permanently failed artifact job.
#[derive(Debug, Serialize)]
pub struct FailedArtifactResponse {
    pub job_id: String,
    pub entity_kind: String,
    pub entity_id: i64,
    pub asset_kind: String,
    pub source_url: String,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub updated_at: String,
}

impl FailedArtifactResponse {
    fn from_row(row: ArtifactJobRow) -> ApiResult<Self> {
        Ok(Self {
            job_id: row.job_id.to_string(),
            entity_kind: row.entity_kind,
            entity_id: row.entity_id,
            asset_kind: row.asset_kind,
            source_url: row.source_url,
            attempts: row.attempts,
            last_error: row.last_error,
            updated_at: format_ts(row.updated_at)?,
        })
    }
}

/// GET /api/v1/admin/artifacts/failed - jobs that exhausted their attempts.
pub async fn list_failed_artifacts(
    State(state): State<AppState>,
    Query(params): Query<ListLimit>,
    req: Request,
) -> ApiResult<Json<Vec<FailedArtifactResponse>>> {
    require_admin(&req)?;

    let rows = state
        .store
        .list_failed_artifact_jobs(params.limit.min(500))
        .await?;
    let mut jobs = Vec::with_capacity(rows.len());
    for row in rows {
        jobs.push(FailedArtifactResponse::from_row(row)?);
    }
    Ok(Json(jobs))
}

#[derive(Debug, Serialize)]
pub struct BackfillResponse {
    pub enqueued: u32,
}

/// POST /api/v1/admin/artifacts/backfill - enqueue jobs for assets with no
/// published variants.
pub async fn backfill_artifacts(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<BackfillResponse>)> {
    require_admin(&req)?;

    let enqueued = state.artifacts.backfill_missing().await?;
    tracing::info!(enqueued, "artifact backfill triggered");
    Ok((StatusCode::ACCEPTED, Json(BackfillResponse { enqueued })))
}

/// Read and deserialize a JSON request body after auth checks have already
/// consumed the request head.
async fn parse_body<T: serde::de::DeserializeOwned>(req: Request) -> ApiResult<T> {
    let bytes = axum::body::to_bytes(req.into_body(), 1024 * 1024)
        .await
        .map_err(|e| ApiError::Validation(format!("unreadable request body: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::Validation(format!("invalid request body: {e}")))
}
