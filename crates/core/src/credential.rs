//! API credential types.

use crate::secret::SecretHash;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Unique identifier for a credential.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CredentialId(Uuid);

impl CredentialId {
    /// Generate a new random credential ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidCredential(format!("invalid credential ID: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CredentialId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CredentialId({})", self.0)
    }
}

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A service credential with its metadata.
///
/// The secret itself is never held here; only its salted hash is stored.
#[derive(Clone, Debug)]
pub struct Credential {
    /// Credential identifier.
    pub id: CredentialId,
    /// Public lookup handle presented at login (e.g. "mq_k_a1b2...").
    pub key_id: String,
    /// Human-readable name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Salted hash of the secret.
    pub secret: SecretHash,
    /// Salted hash of the PIN, when the credential requires one.
    pub pin: Option<SecretHash>,
    /// Whether the credential may authenticate.
    pub active: bool,
    /// Whether the credential may call admin routes.
    pub admin: bool,
    /// Per-minute request quota.
    pub rate_limit_per_minute: u32,
    /// When the credential expires, if ever.
    pub expires_at: Option<OffsetDateTime>,
    /// Last time the credential authenticated or made a request.
    pub last_used_at: Option<OffsetDateTime>,
    /// Lifetime request counter.
    pub total_requests: i64,
    /// Who created the credential.
    pub created_by: Option<String>,
    /// When the credential was created.
    pub created_at: OffsetDateTime,
}

impl Credential {
    /// Check if the credential has expired.
    pub fn is_expired(&self) -> bool {
        if let Some(expires_at) = self.expires_at
            && OffsetDateTime::now_utc() > expires_at
        {
            return true;
        }
        false
    }

    /// Check if the credential may authenticate (active and not expired).
    pub fn is_valid(&self) -> bool {
        self.active && !self.is_expired()
    }

    /// Last four characters of the key id, for listings and logs.
    pub fn key_preview(&self) -> String {
        let tail: String = self
            .key_id
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("...{tail}")
    }
}

/// Request to create a credential.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateCredentialRequest {
    /// Human-readable name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Require a PIN alongside the secret at login.
    #[serde(default)]
    pub pin: Option<String>,
    /// Grant admin access.
    #[serde(default)]
    pub admin: bool,
    /// Per-minute request quota (defaults to the server default).
    pub rate_limit_per_minute: Option<u32>,
    /// Expiration duration in seconds (optional).
    pub expires_in: Option<u64>,
}

/// Response from creating a credential.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateCredentialResponse {
    /// The credential ID.
    pub credential_id: String,
    /// The public key id used at login.
    pub key_id: String,
    /// The secret (only returned once).
    pub secret: String,
    /// Last four characters of the key id.
    pub key_preview: String,
    /// When the credential expires.
    pub expires_at: Option<String>,
}

/// Request to update a credential. Absent fields are left unchanged.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UpdateCredentialRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub active: Option<bool>,
    pub rate_limit_per_minute: Option<u32>,
    /// New expiry in seconds from now; `0` clears the expiry.
    pub expires_in: Option<u64>,
}
