//! Bootstrap admin credential initialization.

use anyhow::{Result, bail};
use marquee_core::config::AdminConfig;
use marquee_core::credential::{Credential, CredentialId};
use marquee_core::secret::SecretHash;
use marquee_metadata::MetadataStore;
use marquee_metadata::models::CredentialRow;
use time::OffsetDateTime;

/// Ensure the configured admin credential exists.
///
/// If the secret hash in config changes between restarts, the stored hash is
/// updated in place so the operator's new secret works immediately.
pub async fn ensure_admin_credential(
    store: &dyn MetadataStore,
    config: &AdminConfig,
) -> Result<()> {
    let (salt, hash) = match config.parts() {
        Ok(parts) => parts,
        Err(err) => bail!("invalid admin credential config: {err}"),
    };
    if !salt.chars().all(|c| c.is_ascii_hexdigit())
        || !hash.chars().all(|c| c.is_ascii_hexdigit())
    {
        bail!("invalid admin.secret_hash: salt and hash must be hex");
    }

    if let Some(existing) = store.get_credential_by_key_id(&config.key_id).await? {
        let mut credential = existing.into_credential();
        if credential.secret.salt == salt && credential.secret.hash == hash && credential.active {
            tracing::debug!("admin credential already exists");
            return Ok(());
        }

        credential.secret = SecretHash { salt, hash };
        credential.active = true;
        store
            .update_credential(&CredentialRow::from_credential(&credential))
            .await?;
        tracing::info!(key_id = %config.key_id, "admin credential secret rotated");
        return Ok(());
    }

    let credential = Credential {
        id: CredentialId::new(),
        key_id: config.key_id.clone(),
        name: config.name.clone(),
        description: Some("bootstrap admin credential".to_string()),
        secret: SecretHash { salt, hash },
        pin: None,
        active: true,
        admin: true,
        rate_limit_per_minute: 0, // 0 falls back to the configured default
        expires_at: None,
        last_used_at: None,
        total_requests: 0,
        created_by: None,
        created_at: OffsetDateTime::now_utc(),
    };
    store
        .create_credential(&CredentialRow::from_credential(&credential))
        .await?;
    tracing::info!(key_id = %config.key_id, credential_id = %credential.id, "admin credential created");

    Ok(())
}
