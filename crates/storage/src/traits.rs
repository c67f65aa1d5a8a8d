//! Object store trait.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use time::OffsetDateTime;

/// Metadata about a stored object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time, if the backend reports one.
    pub last_modified: Option<OffsetDateTime>,
    /// Content type, if the backend stores one.
    pub content_type: Option<String>,
}

/// Abstract object storage backend for artifact variants.
///
/// Variants are small (at most a few megabytes), so the interface is
/// whole-object: no byte ranges, no streaming uploads.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get object metadata without the body.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Fetch an object.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Store an object, overwriting any existing one.
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()>;

    /// Delete an object. Deleting a missing object is an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List all keys under a prefix.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Backend name for logging and health output.
    fn backend_name(&self) -> &'static str;

    /// Check backend connectivity and health.
    async fn health_check(&self) -> StorageResult<()>;
}
