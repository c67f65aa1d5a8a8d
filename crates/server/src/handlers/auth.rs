//! Login and identity endpoints.

use crate::auth::{require_auth, verify_login};
use crate::error::{ApiError, ApiResult};
use crate::session;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Request, State};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;

/// Login request body.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub key_id: String,
    pub secret: String,
    #[serde(default)]
    pub pin: Option<String>,
}

/// Login response: a session token and when it expires.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: String,
}

/// POST /api/v1/auth/login - exchange a credential for a session token.
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let credential = match verify_login(&state, &body.key_id, &body.secret, body.pin.as_deref())
        .await
    {
        Ok(credential) => {
            crate::metrics::LOGINS_TOTAL.with_label_values(&["success"]).inc();
            credential
        }
        Err(err) => {
            crate::metrics::LOGINS_TOTAL.with_label_values(&["failure"]).inc();
            return Err(err);
        }
    };

    let issued = session::issue(&state.config.session, credential.id)?;
    let expires_at = issued
        .expires_at
        .format(&Rfc3339)
        .map_err(|e| ApiError::Internal(format!("failed to format expiry: {e}")))?;

    tracing::info!(key = %credential.key_preview(), "credential logged in");

    Ok(Json(LoginResponse {
        token: issued.token,
        expires_at,
    }))
}

/// Response for the authenticated caller.
#[derive(Debug, Serialize)]
pub struct WhoamiResponse {
    pub credential_id: String,
    pub key_preview: String,
    pub name: String,
    pub admin: bool,
    pub rate_limit_per_minute: u32,
    pub expires_at: Option<String>,
}

/// GET /api/v1/auth/whoami - echo the authenticated credential.
pub async fn whoami(req: Request) -> ApiResult<Json<WhoamiResponse>> {
    let auth = require_auth(&req)?;
    let credential = &auth.credential;

    let expires_at = match credential.expires_at {
        Some(ts) => Some(
            ts.format(&Rfc3339)
                .map_err(|e| ApiError::Internal(format!("failed to format expires_at: {e}")))?,
        ),
        None => None,
    };

    Ok(Json(WhoamiResponse {
        credential_id: credential.id.to_string(),
        key_preview: credential.key_preview(),
        name: credential.name.clone(),
        admin: credential.admin,
        rate_limit_per_minute: credential.rate_limit_per_minute,
        expires_at,
    }))
}
