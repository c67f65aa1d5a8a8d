//! Cache error types.

use marquee_metadata::MetadataError;
use marquee_upstream::UpstreamError;
use thiserror::Error;

/// Errors from the tiered cache resolve path.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The entity does not exist upstream. Covers both a live 404 and a
    /// negative cache hit.
    #[error("entity not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error("invalid cached payload: {0}")]
    Corrupt(String),
}

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;
