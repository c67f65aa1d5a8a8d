//! Sync and artifact pipeline error types.

use marquee_metadata::MetadataError;
use marquee_storage::StorageError;
use marquee_upstream::UpstreamError;
use thiserror::Error;

/// Errors from sync jobs and the artifact pipeline.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An active job of the same kind already exists.
    #[error("a {0} job is already active")]
    Conflict(String),

    #[error("sync job not found: {0}")]
    JobNotFound(uuid::Uuid),

    /// The job aborted after repeated batch failures.
    #[error("job aborted: {0}")]
    Aborted(String),

    /// Source bytes were rejected or could not be processed into variants.
    #[error("artifact processing failed: {0}")]
    Processing(String),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result type for sync operations.
pub type SyncResult<T> = std::result::Result<T, SyncError>;
