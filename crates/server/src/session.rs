//! HS256 session tokens minted at login.
//!
//! Tokens are stateless: the signature and expiry are verified without a
//! store hit. Revocation is handled separately by the liveness check in the
//! auth middleware.

use crate::error::{ApiError, ApiResult};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use marquee_core::config::SessionConfig;
use marquee_core::credential::CredentialId;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Session token claims.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Credential ID the session belongs to.
    pub sub: String,
    /// Issued-at, unix seconds.
    pub iat: i64,
    /// Expiry, unix seconds.
    pub exp: i64,
}

/// A minted session token with its expiry.
#[derive(Debug)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: OffsetDateTime,
}

/// Mint a session token for a credential.
pub fn issue(config: &SessionConfig, credential_id: CredentialId) -> ApiResult<IssuedToken> {
    let now = OffsetDateTime::now_utc();
    let expires_at = now + time::Duration::seconds(config.token_ttl_secs as i64);
    let claims = Claims {
        sub: credential_id.to_string(),
        iat: now.unix_timestamp(),
        exp: expires_at.unix_timestamp(),
    };
    let key = EncodingKey::from_secret(config.signing_secret.as_bytes());
    let token = encode(&Header::new(Algorithm::HS256), &claims, &key)
        .map_err(|e| ApiError::Internal(format!("failed to sign session token: {e}")))?;
    Ok(IssuedToken { token, expires_at })
}

/// Verify a session token's signature and expiry, returning the credential ID.
pub fn verify(config: &SessionConfig, token: &str) -> ApiResult<CredentialId> {
    let key = DecodingKey::from_secret(config.signing_secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.leeway = 0;

    let data = decode::<Claims>(token, &key, &validation).map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
            ApiError::InvalidToken("session expired".to_string())
        }
        _ => ApiError::InvalidToken("signature verification failed".to_string()),
    })?;

    CredentialId::parse(&data.claims.sub)
        .map_err(|_| ApiError::InvalidToken("malformed subject claim".to_string()))
}
