//! Configuration types shared across crates.

use crate::artifact::ImageFormat;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Per-request deadline in seconds for resolve handlers. A cold resolve
    /// that cannot complete an upstream fetch within this window returns 504.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// SECURITY: When enabled, ensure this endpoint is network-restricted
    /// to authorized Prometheus scraper IPs only at the infrastructure level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            request_timeout_secs: default_request_timeout_secs(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl ServerConfig {
    /// Get the request timeout as a Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Upstream metadata API configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the upstream API (e.g., "https://api4.thetvdb.com/v4").
    pub base_url: String,
    /// Upstream API key.
    /// WARNING: Prefer the MARQUEE_UPSTREAM__API_KEY env var over config files.
    pub api_key: String,
    /// Optional subscriber PIN sent alongside the API key at login.
    pub pin: Option<String>,
    /// Shared token-bucket rate toward the upstream, in requests per second.
    /// Every upstream call, request-path or sync, draws from this bucket.
    #[serde(default = "default_upstream_rps")]
    pub requests_per_second: u32,
    /// Per-request timeout in seconds.
    #[serde(default = "default_upstream_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_upstream_rps() -> u32 {
    10
}

fn default_upstream_timeout_secs() -> u64 {
    30
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate upstream configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.is_empty() {
            return Err("upstream.base_url must not be empty".to_string());
        }
        if self.api_key.is_empty() {
            return Err("upstream.api_key must not be empty".to_string());
        }
        if self.requests_per_second == 0 {
            return Err("upstream.requests_per_second cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Cache tier configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Hot-tier TTL in seconds for static-class entities (default: 24h).
    #[serde(default = "default_static_ttl_secs")]
    pub static_ttl_secs: u64,
    /// Hot-tier TTL in seconds for dynamic-class entities (default: 1h).
    #[serde(default = "default_dynamic_ttl_secs")]
    pub dynamic_ttl_secs: u64,
    /// TTL in seconds for negative (upstream 404) entries (default: 300).
    #[serde(default = "default_negative_ttl_secs")]
    pub negative_ttl_secs: u64,
    /// Maximum number of hot-tier entries before inserts evict (default: 100000).
    #[serde(default = "default_hot_max_entries")]
    pub hot_max_entries: u32,
    /// Interval in seconds between hot-tier expiry sweeps (default: 60).
    #[serde(default = "default_cache_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_static_ttl_secs() -> u64 {
    crate::STATIC_TTL_SECS
}

fn default_dynamic_ttl_secs() -> u64 {
    crate::DYNAMIC_TTL_SECS
}

fn default_negative_ttl_secs() -> u64 {
    crate::NEGATIVE_TTL_SECS
}

fn default_hot_max_entries() -> u32 {
    100_000
}

fn default_cache_cleanup_interval_secs() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            static_ttl_secs: default_static_ttl_secs(),
            dynamic_ttl_secs: default_dynamic_ttl_secs(),
            negative_ttl_secs: default_negative_ttl_secs(),
            hot_max_entries: default_hot_max_entries(),
            cleanup_interval_secs: default_cache_cleanup_interval_secs(),
        }
    }
}

impl CacheConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Validate cache configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.cleanup_interval_secs == 0 {
            return Err("cache.cleanup_interval_secs cannot be 0. \
                 This would cause a panic when creating the sweep timer."
                .to_string());
        }
        if self.hot_max_entries == 0 {
            return Err("cache.hot_max_entries cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
    },
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
        }
    }
}

/// Storage backend configuration for artifact objects.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
        /// Base URL under which stored objects are publicly reachable.
        public_base_url: Option<String>,
    },
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// Base URL under which stored objects are publicly reachable
        /// (e.g. a CDN in front of the bucket).
        public_base_url: Option<String>,
        /// AWS access key ID. Falls back to AWS_ACCESS_KEY_ID env var if not set.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        access_key_id: Option<String>,
        /// AWS secret access key. Falls back to AWS_SECRET_ACCESS_KEY env var if not set.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        secret_access_key: Option<String>,
        /// Force path-style URLs (e.g., `endpoint/bucket/key`).
        /// Required for MinIO and some S3-compatible services.
        #[serde(default)]
        force_path_style: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/artifacts"),
            public_base_url: None,
        }
    }
}

impl StorageConfig {
    /// Base URL under which stored objects are publicly reachable, if any.
    pub fn public_base_url(&self) -> Option<&str> {
        match self {
            StorageConfig::Filesystem {
                public_base_url, ..
            }
            | StorageConfig::S3 {
                public_base_url, ..
            } => public_base_url.as_deref(),
        }
    }

    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                access_key_id,
                secret_access_key,
                ..
            } => match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                (Some(_), Some(_)) | (None, None) => Ok(()),
                _ => Err(
                    "s3 config requires both access_key_id and secret_access_key when either is set"
                        .to_string(),
                ),
            },
            _ => Ok(()),
        }
    }
}

/// Session token configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// HMAC signing secret for session tokens (min 32 bytes).
    /// WARNING: Prefer the MARQUEE_SESSION__SIGNING_SECRET env var.
    pub signing_secret: String,
    /// Session token lifetime in seconds (default: 7 days).
    #[serde(default = "default_session_ttl_secs")]
    pub token_ttl_secs: u64,
    /// How long a credential liveness result may be cached, in seconds.
    /// Revoking a credential takes effect within this window (default: 30).
    #[serde(default = "default_liveness_check_secs")]
    pub liveness_check_secs: u64,
}

fn default_session_ttl_secs() -> u64 {
    7 * 24 * 3600
}

fn default_liveness_check_secs() -> u64 {
    30
}

impl SessionConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_check_secs)
    }

    /// Validate session configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.signing_secret.len() < 32 {
            return Err(
                "session.signing_secret must be at least 32 bytes of entropy".to_string(),
            );
        }
        if self.token_ttl_secs == 0 {
            return Err("session.token_ttl_secs cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Sync engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Enable the background scheduler (incremental + cleanup loops).
    #[serde(default = "default_sync_scheduler_enabled")]
    pub scheduler_enabled: bool,
    /// Interval in seconds between incremental sync runs (default: 15 min).
    #[serde(default = "default_incremental_interval_secs")]
    pub incremental_interval_secs: u64,
    /// Interval in seconds between cleanup runs (default: 24h).
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// How long a soft-deleted entity is retained before hard deletion,
    /// in seconds (default: 30 days).
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// Entities processed per batch (default: 100).
    #[serde(default = "default_sync_batch_size")]
    pub batch_size: u32,
    /// Consecutive batch failures that abort a job (default: 3).
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    /// Base delay in milliseconds for batch retry backoff (default: 1000).
    /// Doubles per consecutive failure, capped at `backoff_cap_ms`.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Backoff ceiling in milliseconds (default: 60000).
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
}

fn default_sync_scheduler_enabled() -> bool {
    true
}

fn default_incremental_interval_secs() -> u64 {
    900 // 15 minutes
}

fn default_cleanup_interval_secs() -> u64 {
    86400 // daily
}

fn default_retention_secs() -> u64 {
    30 * 86400
}

fn default_sync_batch_size() -> u32 {
    100
}

fn default_max_consecutive_failures() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_cap_ms() -> u64 {
    60_000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            scheduler_enabled: default_sync_scheduler_enabled(),
            incremental_interval_secs: default_incremental_interval_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            retention_secs: default_retention_secs(),
            batch_size: default_sync_batch_size(),
            max_consecutive_failures: default_max_consecutive_failures(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
        }
    }
}

impl SyncConfig {
    pub fn incremental_interval(&self) -> Duration {
        Duration::from_secs(self.incremental_interval_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn retention(&self) -> time::Duration {
        let secs = i64::try_from(self.retention_secs).unwrap_or(i64::MAX);
        time::Duration::seconds(secs)
    }

    /// Backoff delay after `failures` consecutive batch failures.
    pub fn backoff(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(16);
        let ms = self
            .backoff_base_ms
            .saturating_mul(1u64 << exp)
            .min(self.backoff_cap_ms);
        Duration::from_millis(ms)
    }

    /// Validate sync configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.incremental_interval_secs == 0 || self.cleanup_interval_secs == 0 {
            return Err("sync intervals cannot be 0. \
                 This would cause a panic when creating the schedule timers."
                .to_string());
        }
        if self.batch_size == 0 {
            return Err("sync.batch_size cannot be 0".to_string());
        }
        if self.max_consecutive_failures == 0 {
            return Err("sync.max_consecutive_failures cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Artifact pipeline configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Maximum accepted source image size in bytes (default: 20 MiB).
    #[serde(default = "default_max_source_bytes")]
    pub max_source_bytes: u64,
    /// Output encoding for resized variants (default: jpeg).
    #[serde(default)]
    pub format: ImageFormat,
    /// JPEG quality, 1-100 (default: 85). Ignored for png.
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    /// Processing attempts per artifact before it is marked permanently
    /// failed (default: 3).
    #[serde(default = "default_artifact_max_attempts")]
    pub max_attempts: u32,
    /// Delay in seconds between processing attempts (default: 60).
    #[serde(default = "default_artifact_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Concurrent pipeline workers (default: 4).
    #[serde(default = "default_artifact_workers")]
    pub worker_count: u32,
}

fn default_max_source_bytes() -> u64 {
    20 * 1024 * 1024
}

fn default_jpeg_quality() -> u8 {
    85
}

fn default_artifact_max_attempts() -> u32 {
    3
}

fn default_artifact_retry_delay_secs() -> u64 {
    60
}

fn default_artifact_workers() -> u32 {
    4
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            max_source_bytes: default_max_source_bytes(),
            format: ImageFormat::default(),
            jpeg_quality: default_jpeg_quality(),
            max_attempts: default_artifact_max_attempts(),
            retry_delay_secs: default_artifact_retry_delay_secs(),
            worker_count: default_artifact_workers(),
        }
    }
}

impl ArtifactConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Validate artifact configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(format!(
                "artifacts.jpeg_quality {} out of range (1-100)",
                self.jpeg_quality
            ));
        }
        if self.worker_count == 0 {
            return Err("artifacts.worker_count cannot be 0".to_string());
        }
        if self.max_attempts == 0 {
            return Err("artifacts.max_attempts cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Rate limiting configuration for client credentials.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
    /// Default per-minute quota for credentials that do not set their own.
    #[serde(default = "default_requests_per_minute")]
    pub default_requests_per_minute: u32,
    /// Burst headroom as a percentage of the quota (default: 15, spec'd 10-20).
    #[serde(default = "default_burst_percent")]
    pub burst_percent: u32,
    /// Maximum number of credentials to track before rejecting new entries
    /// (default: 100000). Prevents memory exhaustion.
    #[serde(default = "default_max_entries")]
    pub max_entries: u32,
    /// Interval in seconds between cleanup sweeps of stale entries (default: 60).
    #[serde(default = "default_rl_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Time-to-live in seconds for rate limit entries (default: 300).
    /// Entries not accessed within this period are evicted during cleanup.
    #[serde(default = "default_entry_ttl_secs")]
    pub entry_ttl_secs: u64,
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_requests_per_minute() -> u32 {
    100
}

fn default_burst_percent() -> u32 {
    15
}

fn default_max_entries() -> u32 {
    100_000
}

fn default_rl_cleanup_interval_secs() -> u64 {
    60
}

fn default_entry_ttl_secs() -> u64 {
    300
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            default_requests_per_minute: default_requests_per_minute(),
            burst_percent: default_burst_percent(),
            max_entries: default_max_entries(),
            cleanup_interval_secs: default_rl_cleanup_interval_secs(),
            entry_ttl_secs: default_entry_ttl_secs(),
        }
    }
}

impl RateLimitConfig {
    /// Burst capacity for a given per-minute quota: quota plus the configured
    /// headroom, minimum one extra slot.
    pub fn burst_for(&self, per_minute: u32) -> u32 {
        let headroom = (per_minute.saturating_mul(self.burst_percent) / 100).max(1);
        per_minute.saturating_add(headroom)
    }

    /// Validate rate limit configuration for dangerous settings.
    /// Returns warnings for configs that are insecure but allowed,
    /// and errors for configs that are unsafe and should be rejected.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();

        if !self.enabled {
            return Ok(warnings);
        }

        if self.cleanup_interval_secs == 0 {
            return Err("rate_limit.cleanup_interval_secs cannot be 0. \
                 This would cause a panic when creating the cleanup timer. \
                 Use a value >= 1 second."
                .to_string());
        }

        if !(10..=20).contains(&self.burst_percent) {
            warnings.push(format!(
                "rate_limit.burst_percent={} is outside the recommended 10-20 range",
                self.burst_percent
            ));
        }

        if self.entry_ttl_secs < 120 {
            warnings.push(format!(
                "rate_limit.entry_ttl_secs={} is very short. \
                 Entries may be evicted before rate limits reset, \
                 allowing clients to bypass limits by waiting. \
                 Recommended minimum: 120 seconds.",
                self.entry_ttl_secs
            ));
        }

        Ok(warnings)
    }
}

/// Bootstrap admin credential configuration.
///
/// The admin credential is required for server operation. It provides initial
/// access to create further credentials and trigger sync jobs. If the secret
/// hash changes between restarts, the stored hash is updated in place.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Public key id for the bootstrap admin credential.
    #[serde(default = "default_admin_key_id")]
    pub key_id: String,
    /// Pre-computed salted hash of the admin secret, as `{salt_hex}:{hash_hex}`.
    /// Generate with: `marquee-hash <secret>` or any SHA-256(salt || secret).
    pub secret_hash: String,
    /// Name recorded for the bootstrap credential.
    #[serde(default = "default_admin_name")]
    pub name: String,
}

fn default_admin_key_id() -> String {
    "mq_k_admin".to_string()
}

fn default_admin_name() -> String {
    "bootstrap admin".to_string()
}

impl AdminConfig {
    /// Create a test configuration with a dummy secret hash.
    ///
    /// **For testing only.** The plaintext secret is "test-admin-secret".
    pub fn for_testing() -> Self {
        Self {
            key_id: default_admin_key_id(),
            // salt "00..0" (16 bytes) + SHA256(salt_hex || "test-admin-secret")
            secret_hash: "00000000000000000000000000000000:\
                          3a6bbffaeda7130a955f9156624876635686244ad2e20caa2762b331a702b98b"
                .to_string(),
            name: default_admin_name(),
        }
    }

    /// Split into (salt, hash) parts.
    pub fn parts(&self) -> Result<(String, String), String> {
        match self.secret_hash.split_once(':') {
            Some((salt, hash)) if !salt.is_empty() && hash.len() == 64 => {
                Ok((salt.to_string(), hash.to_string()))
            }
            _ => Err("admin.secret_hash must be '{salt_hex}:{sha256_hex}'".to_string()),
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Upstream API configuration (required).
    pub upstream: UpstreamConfig,
    /// Cache tier configuration.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Artifact storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Session token configuration (required).
    pub session: SessionConfig,
    /// Bootstrap admin credential configuration (required).
    pub admin: AdminConfig,
    /// Sync engine configuration.
    #[serde(default)]
    pub sync: SyncConfig,
    /// Artifact pipeline configuration.
    #[serde(default)]
    pub artifacts: ArtifactConfig,
    /// Rate limiting configuration.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses filesystem storage, SQLite metadata,
    /// a dummy admin credential, and a fixed signing secret.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig::default(),
            upstream: UpstreamConfig {
                base_url: "http://127.0.0.1:1/api".to_string(),
                api_key: "test-api-key".to_string(),
                pin: None,
                requests_per_second: default_upstream_rps(),
                timeout_secs: default_upstream_timeout_secs(),
            },
            cache: CacheConfig::default(),
            metadata: MetadataConfig::default(),
            storage: StorageConfig::default(),
            session: SessionConfig {
                signing_secret: "test-signing-secret-0123456789abcdef".to_string(),
                token_ttl_secs: default_session_ttl_secs(),
                liveness_check_secs: default_liveness_check_secs(),
            },
            admin: AdminConfig::for_testing(),
            sync: SyncConfig::default(),
            artifacts: ArtifactConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }

    /// Validate the whole configuration. Returns accumulated warnings.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        self.upstream.validate()?;
        self.cache.validate()?;
        self.storage.validate()?;
        self.session.validate()?;
        self.sync.validate()?;
        self.artifacts.validate()?;
        self.admin.parts()?;
        self.rate_limit.validate()
    }
}
