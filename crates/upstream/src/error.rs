//! Upstream API error types.

use thiserror::Error;

/// Errors from the upstream metadata API.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The upstream has no record for the requested entity.
    #[error("upstream entity not found")]
    NotFound,

    /// The upstream rejected the request due to its own rate limiting.
    #[error("upstream rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Upstream authentication failed (bad API key or expired bearer).
    #[error("upstream authentication failed: {0}")]
    Auth(String),

    /// Upstream returned a server error or was unreachable.
    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    /// The request timed out.
    #[error("upstream request timed out")]
    Timeout,

    /// The response body could not be decoded.
    #[error("failed to decode upstream response: {0}")]
    Decode(String),

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
}

impl UpstreamError {
    /// Whether the error is transient and a retry may help.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UpstreamError::RateLimited { .. }
                | UpstreamError::Unavailable(_)
                | UpstreamError::Timeout
                | UpstreamError::Http(_)
        )
    }
}

/// Result type for upstream operations.
pub type UpstreamResult<T> = std::result::Result<T, UpstreamError>;
