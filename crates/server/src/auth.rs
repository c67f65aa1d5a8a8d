//! Authentication and authorization middleware.

use crate::error::{ApiError, ApiResult};
use crate::session;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;
use marquee_core::credential::{Credential, CredentialId};
use marquee_core::secret::dummy_hash;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tracing::Instrument;
use uuid::Uuid;

/// Maximum length for trace IDs.
/// Longer trace IDs are truncated to prevent log bloat and potential log injection.
const MAX_TRACE_ID_LEN: usize = 128;

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new random trace ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a trace ID from a client-provided value.
    /// The value is sanitized: truncated to MAX_TRACE_ID_LEN characters and
    /// non-printable characters removed.
    pub fn from_client(value: &str) -> Self {
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .collect();

        if sanitized.is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    /// Get the trace ID as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authenticated request extension.
#[derive(Clone, Debug)]
pub struct AuthenticatedCredential {
    /// The live credential behind the session token.
    pub credential: Credential,
}

impl AuthenticatedCredential {
    /// Require the admin flag, returning 403 if not set.
    pub fn require_admin(&self) -> ApiResult<()> {
        if self.credential.admin {
            Ok(())
        } else {
            Err(ApiError::Forbidden(
                "admin credential required".to_string(),
            ))
        }
    }
}

/// Short-TTL cache of credential liveness lookups.
///
/// Session tokens verify statelessly; this cache bounds how long a revoked
/// or expired credential can keep using one without a store hit per request.
pub struct LivenessCache {
    entries: DashMap<Uuid, CachedLiveness>,
    ttl: Duration,
}

#[derive(Clone)]
struct CachedLiveness {
    credential: Credential,
    checked_at: Instant,
}

impl LivenessCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    fn get(&self, id: &Uuid) -> Option<Credential> {
        let entry = self.entries.get(id)?;
        if entry.checked_at.elapsed() < self.ttl {
            Some(entry.credential.clone())
        } else {
            drop(entry);
            self.entries.remove(id);
            None
        }
    }

    fn insert(&self, credential: Credential) {
        self.entries.insert(
            *credential.id.as_uuid(),
            CachedLiveness {
                credential,
                checked_at: Instant::now(),
            },
        );
    }

    /// Drop a cached entry so the next request re-checks the store.
    /// Called after admin mutations to make revocation immediate locally.
    pub fn forget(&self, id: &Uuid) {
        self.entries.remove(id);
    }
}

/// Extract bearer token from Authorization header.
/// Per RFC 6750, the "Bearer" scheme is case-insensitive.
fn extract_bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            if v.len() >= 7 && v[..7].eq_ignore_ascii_case("bearer ") {
                Some(&v[7..])
            } else {
                None
            }
        })
}

/// Extract trace ID from X-Trace-Id header or generate a new one.
fn extract_or_generate_trace_id(req: &Request) -> TraceId {
    req.headers()
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_else(TraceId::new)
}

/// Verify a login attempt against the credential store.
///
/// Every failure mode returns the same `InvalidCredential` error, and an
/// unknown key id still burns a hash comparison, so neither the response nor
/// its timing reveals whether the key exists.
pub async fn verify_login(
    state: &AppState,
    key_id: &str,
    secret: &str,
    pin: Option<&str>,
) -> ApiResult<Credential> {
    let row = state.store.get_credential_by_key_id(key_id).await?;

    let Some(row) = row else {
        dummy_hash().verify(secret);
        return Err(ApiError::InvalidCredential);
    };
    let credential = row.into_credential();

    if !credential.secret.verify(secret) {
        return Err(ApiError::InvalidCredential);
    }
    match (&credential.pin, pin) {
        (Some(expected), Some(given)) if expected.verify(given) => {}
        (None, _) => {}
        _ => return Err(ApiError::InvalidCredential),
    }
    if !credential.is_valid() {
        return Err(ApiError::InvalidCredential);
    }

    Ok(credential)
}

/// Resolve a session token to a live credential.
///
/// Signature and expiry are checked statelessly; the credential itself is
/// re-checked through the liveness cache so deactivation takes effect within
/// one liveness interval.
async fn authorize(state: &AppState, token: &str) -> ApiResult<Credential> {
    let credential_id = session::verify(&state.config.session, token)?;
    let uuid = *credential_id.as_uuid();

    if let Some(credential) = state.liveness.get(&uuid) {
        if !credential.is_valid() {
            return Err(ApiError::InvalidToken(
                "credential revoked or expired".to_string(),
            ));
        }
        return Ok(credential);
    }

    let row = state
        .store
        .get_credential(uuid)
        .await?
        .ok_or_else(|| ApiError::InvalidToken("credential no longer exists".to_string()))?;
    let credential = row.into_credential();
    state.liveness.insert(credential.clone());

    if !credential.is_valid() {
        return Err(ApiError::InvalidToken(
            "credential revoked or expired".to_string(),
        ));
    }
    Ok(credential)
}

/// Authentication middleware: resolves bearer session tokens and sets up
/// trace context.
///
/// A missing header falls through unauthenticated (handlers decide whether
/// auth is required); a presented token that fails verification is rejected
/// here.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let trace_id = extract_or_generate_trace_id(&req);
    let trace_id_str = trace_id.0.clone();
    req.extensions_mut().insert(trace_id);

    if let Some(token) = extract_bearer_token(&req) {
        let credential = authorize(&state, token).await?;

        // Record usage without holding up the request.
        let store = state.store.clone();
        let credential_id = *credential.id.as_uuid();
        tokio::spawn(async move {
            let _ = store
                .touch_credential(credential_id, OffsetDateTime::now_utc())
                .await;
        });

        req.extensions_mut()
            .insert(AuthenticatedCredential { credential });
    }

    let response = next
        .run(req)
        .instrument(tracing::info_span!("request", trace_id = %trace_id_str))
        .await;

    Ok(response)
}

/// Require authentication (a verified session token must be present).
pub fn require_auth(req: &Request) -> ApiResult<&AuthenticatedCredential> {
    req.extensions()
        .get::<AuthenticatedCredential>()
        .ok_or(ApiError::MissingToken)
}

/// Require an admin credential.
pub fn require_admin(req: &Request) -> ApiResult<&AuthenticatedCredential> {
    let auth = require_auth(req)?;
    auth.require_admin()?;
    Ok(auth)
}

/// Get the trace ID from request extensions.
pub fn get_trace_id(req: &Request) -> Option<&TraceId> {
    req.extensions().get::<TraceId>()
}
