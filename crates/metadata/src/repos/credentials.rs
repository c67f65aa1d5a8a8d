//! Credential repository.

use crate::error::MetadataResult;
use crate::models::CredentialRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for credential operations.
#[async_trait]
pub trait CredentialRepo: Send + Sync {
    /// Create a credential. Fails with AlreadyExists on a duplicate key_id.
    async fn create_credential(&self, row: &CredentialRow) -> MetadataResult<()>;

    /// Get a credential by ID.
    async fn get_credential(&self, credential_id: Uuid) -> MetadataResult<Option<CredentialRow>>;

    /// Get a credential by its public key id (the login lookup path).
    async fn get_credential_by_key_id(&self, key_id: &str)
    -> MetadataResult<Option<CredentialRow>>;

    /// Update mutable credential fields (name, description, active flag,
    /// rate limit, expiry). Identity and hashes are immutable.
    async fn update_credential(&self, row: &CredentialRow) -> MetadataResult<()>;

    /// Record usage: bump last_used_at and the lifetime request counter.
    /// Called fire-and-forget from the request path.
    async fn touch_credential(
        &self,
        credential_id: Uuid,
        used_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Delete a credential.
    async fn delete_credential(&self, credential_id: Uuid) -> MetadataResult<()>;

    /// List all credentials, newest first.
    async fn list_credentials(&self) -> MetadataResult<Vec<CredentialRow>>;
}
