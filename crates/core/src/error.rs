//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid entity kind: {0}")]
    InvalidEntityKind(String),

    #[error("invalid entity id: {0}")]
    InvalidEntityId(String),

    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    #[error("invalid size class: {0}")]
    InvalidSizeClass(String),

    #[error("invalid asset kind: {0}")]
    InvalidAssetKind(String),

    #[error("invalid image format: {0}")]
    InvalidImageFormat(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
