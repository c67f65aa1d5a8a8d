//! API error types.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header::RETRY_AFTER};
use axum::response::{IntoResponse, Response};
use marquee_cache::CacheError;
use marquee_sync::SyncError;
use marquee_upstream::UpstreamError;
use serde::Serialize;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Request correlation ID, when one was assigned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Login failed. Every admission failure collapses into this variant so
    /// the response never reveals whether the key id exists.
    #[error("invalid credential")]
    InvalidCredential,

    #[error("authentication required")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("upstream rate limited")]
    UpstreamRateLimited { retry_after_secs: Option<u64> },

    #[error("upstream timed out")]
    UpstreamTimeout,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(#[from] marquee_storage::StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] marquee_metadata::MetadataError),

    #[error("core error: {0}")]
    Core(#[from] marquee_core::Error),
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::NotFound(key) => Self::NotFound(key),
            CacheError::Upstream(upstream) => upstream.into(),
            CacheError::Metadata(metadata) => Self::Metadata(metadata),
            CacheError::Corrupt(msg) => Self::Internal(msg),
        }
    }
}

impl From<UpstreamError> for ApiError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::NotFound => Self::NotFound("entity not found upstream".to_string()),
            UpstreamError::RateLimited { retry_after_secs } => {
                Self::UpstreamRateLimited { retry_after_secs }
            }
            UpstreamError::Timeout => Self::UpstreamTimeout,
            other => Self::UpstreamUnavailable(other.to_string()),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Conflict(kind) => {
                Self::Conflict(format!("a {kind} sync job is already active"))
            }
            SyncError::JobNotFound(id) => Self::NotFound(format!("sync job {id}")),
            SyncError::Metadata(metadata) => Self::Metadata(metadata),
            SyncError::Upstream(upstream) => upstream.into(),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCredential => "invalid_credential",
            Self::MissingToken => "missing_token",
            Self::InvalidToken(_) => "invalid_token",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation",
            Self::Conflict(_) => "conflict",
            Self::RateLimited { .. } => "rate_limited",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::UpstreamRateLimited { .. } => "upstream_rate_limited",
            Self::UpstreamTimeout => "upstream_timeout",
            Self::Internal(_) => "internal",
            Self::Storage(e) => match e {
                marquee_storage::StorageError::NotFound(_) => "not_found",
                _ => "internal",
            },
            Self::Metadata(e) => match e {
                marquee_metadata::MetadataError::NotFound(_) => "not_found",
                marquee_metadata::MetadataError::AlreadyExists(_) => "conflict",
                _ => "internal",
            },
            Self::Core(_) => "validation",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidCredential => StatusCode::UNAUTHORIZED,
            Self::MissingToken => StatusCode::UNAUTHORIZED,
            Self::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::UpstreamRateLimited { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage(e) => match e {
                marquee_storage::StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Metadata(e) => match e {
                marquee_metadata::MetadataError::NotFound(_) => StatusCode::NOT_FOUND,
                marquee_metadata::MetadataError::AlreadyExists(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Retry-After value for throttling responses, if applicable.
    fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            Self::UpstreamRateLimited { retry_after_secs } => Some(retry_after_secs.unwrap_or(30)),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let retry_after = self.retry_after();
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
            trace_id: None,
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after
            && let Ok(value) = HeaderValue::from_str(&secs.to_string())
        {
            response.headers_mut().insert(RETRY_AFTER, value);
        }
        response
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
