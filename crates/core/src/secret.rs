//! Secret generation and salted hashing for API credentials.

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Prefix for generated credential secrets.
pub const SECRET_PREFIX: &str = "mq_";

/// A salted SHA-256 digest of a credential secret.
///
/// Both fields are lowercase hex. The salt is rolled per credential, so two
/// credentials with the same secret store different hashes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecretHash {
    pub salt: String,
    pub hash: String,
}

impl SecretHash {
    /// Hash a plaintext secret with a fresh random salt.
    pub fn new(secret: &str) -> Self {
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        let salt = hex::encode(salt);
        let hash = digest_hex(&salt, secret);
        Self { salt, hash }
    }

    /// Verify a candidate secret against this hash in constant time.
    pub fn verify(&self, candidate: &str) -> bool {
        let candidate = digest_hex(&self.salt, candidate);
        constant_time_eq(candidate.as_bytes(), self.hash.as_bytes())
    }
}

fn digest_hex(salt: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compare two byte strings without short-circuiting on the first mismatch.
///
/// Inputs of different lengths compare unequal but still scan the longer
/// input so the comparison cost does not leak the prefix length.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let mut diff = (a.len() ^ b.len()) as u8;
    let n = a.len().max(b.len());
    for i in 0..n {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= x ^ y;
    }
    diff == 0
}

/// Generate a new credential secret: `mq_` + 32 random bytes, hex-encoded.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{SECRET_PREFIX}{}", hex::encode(bytes))
}

/// A fixed hash used to burn a comparison when the credential lookup misses,
/// so unknown key ids cost the same as wrong secrets.
pub fn dummy_hash() -> SecretHash {
    SecretHash {
        salt: "00000000000000000000000000000000".to_string(),
        // Not a SHA-256 digest of anything, so no candidate can match.
        hash: "0000000000000000000000000000000000000000000000000000000000000000".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_verify_roundtrip() {
        let hash = SecretHash::new("mq_abc123");
        assert!(hash.verify("mq_abc123"));
        assert!(!hash.verify("mq_abc124"));
        assert!(!hash.verify(""));
    }

    #[test]
    fn test_same_secret_different_salts() {
        let a = SecretHash::new("secret");
        let b = SecretHash::new("secret");
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(!constant_time_eq(b"", b"a"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn test_generated_secret_shape() {
        let secret = generate_secret();
        assert!(secret.starts_with(SECRET_PREFIX));
        assert_eq!(secret.len(), SECRET_PREFIX.len() + 64);
    }

    #[test]
    fn test_dummy_hash_never_verifies() {
        assert!(!dummy_hash().verify(""));
        assert!(!dummy_hash().verify("mq_anything"));
    }
}
