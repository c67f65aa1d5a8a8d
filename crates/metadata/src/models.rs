//! Database row models.

use marquee_core::credential::{Credential, CredentialId};
use marquee_core::secret::SecretHash;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// A credential row.
#[derive(Debug, Clone, FromRow)]
pub struct CredentialRow {
    pub credential_id: Uuid,
    pub key_id: String,
    pub name: String,
    pub description: Option<String>,
    pub secret_salt: String,
    pub secret_hash: String,
    pub pin_salt: Option<String>,
    pub pin_hash: Option<String>,
    pub active: bool,
    pub is_admin: bool,
    pub rate_limit_per_minute: i64,
    pub expires_at: Option<OffsetDateTime>,
    pub last_used_at: Option<OffsetDateTime>,
    pub total_requests: i64,
    pub created_by: Option<String>,
    pub created_at: OffsetDateTime,
}

impl CredentialRow {
    /// Convert to the domain type.
    pub fn into_credential(self) -> Credential {
        Credential {
            id: CredentialId::from_uuid(self.credential_id),
            key_id: self.key_id,
            name: self.name,
            description: self.description,
            secret: SecretHash {
                salt: self.secret_salt,
                hash: self.secret_hash,
            },
            pin: match (self.pin_salt, self.pin_hash) {
                (Some(salt), Some(hash)) => Some(SecretHash { salt, hash }),
                _ => None,
            },
            active: self.active,
            admin: self.is_admin,
            rate_limit_per_minute: self.rate_limit_per_minute.max(0) as u32,
            expires_at: self.expires_at,
            last_used_at: self.last_used_at,
            total_requests: self.total_requests,
            created_by: self.created_by,
            created_at: self.created_at,
        }
    }

    /// Build a row from the domain type.
    pub fn from_credential(cred: &Credential) -> Self {
        Self {
            credential_id: *cred.id.as_uuid(),
            key_id: cred.key_id.clone(),
            name: cred.name.clone(),
            description: cred.description.clone(),
            secret_salt: cred.secret.salt.clone(),
            secret_hash: cred.secret.hash.clone(),
            pin_salt: cred.pin.as_ref().map(|p| p.salt.clone()),
            pin_hash: cred.pin.as_ref().map(|p| p.hash.clone()),
            active: cred.active,
            is_admin: cred.admin,
            rate_limit_per_minute: cred.rate_limit_per_minute as i64,
            expires_at: cred.expires_at,
            last_used_at: cred.last_used_at,
            total_requests: cred.total_requests,
            created_by: cred.created_by.clone(),
            created_at: cred.created_at,
        }
    }
}

/// A durable cache entry row.
#[derive(Debug, Clone, FromRow)]
pub struct CacheEntryRow {
    pub entity_kind: String,
    pub entity_id: i64,
    /// Raw upstream payload as JSON text.
    pub payload: String,
    pub data_class: String,
    pub refreshed_at: OffsetDateTime,
    /// Set when a full sync no longer saw this entity upstream.
    pub delete_candidate_at: Option<OffsetDateTime>,
    /// Tombstone; soft-deleted rows are invisible to reads.
    pub deleted_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

/// A sync job row.
#[derive(Debug, Clone, FromRow)]
pub struct SyncJobRow {
    pub job_id: Uuid,
    pub job_kind: String,
    pub state: String,
    pub target_kind: Option<String>,
    pub target_id: Option<i64>,
    pub created_at: OffsetDateTime,
    pub started_at: Option<OffsetDateTime>,
    pub finished_at: Option<OffsetDateTime>,
    /// JSON-serialized SyncStats.
    pub stats: Option<String>,
    pub error: Option<String>,
}

/// A published artifact variant row.
#[derive(Debug, Clone, FromRow)]
pub struct ArtifactVariantRow {
    pub entity_kind: String,
    pub entity_id: i64,
    pub asset_kind: String,
    pub size_class: String,
    pub storage_key: String,
    pub byte_size: i64,
    pub format: String,
    pub width: i64,
    pub height: i64,
    pub processed_at: OffsetDateTime,
}

/// An artifact processing job row.
#[derive(Debug, Clone, FromRow)]
pub struct ArtifactJobRow {
    pub job_id: Uuid,
    pub entity_kind: String,
    pub entity_id: i64,
    pub asset_kind: String,
    pub source_url: String,
    pub state: String,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}
