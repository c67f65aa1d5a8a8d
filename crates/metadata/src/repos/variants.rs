//! Artifact variant and artifact job repository.

use crate::error::MetadataResult;
use crate::models::{ArtifactJobRow, ArtifactVariantRow};
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for artifact variants and processing jobs.
#[async_trait]
pub trait VariantRepo: Send + Sync {
    /// Atomically replace the variant set for one (entity, asset) pair.
    /// Either all rows land or none do; readers never observe a partial set.
    async fn replace_variants(
        &self,
        entity_kind: &str,
        entity_id: i64,
        asset_kind: &str,
        variants: &[ArtifactVariantRow],
    ) -> MetadataResult<()>;

    /// Get all published variants of an entity.
    async fn get_variants(
        &self,
        entity_kind: &str,
        entity_id: i64,
    ) -> MetadataResult<Vec<ArtifactVariantRow>>;

    /// Delete all variant rows of an entity, returning their storage keys
    /// so callers can drop the objects too.
    async fn delete_variants_for_entity(
        &self,
        entity_kind: &str,
        entity_id: i64,
    ) -> MetadataResult<Vec<String>>;

    /// Storage keys of every published variant of an entity.
    async fn get_variant_keys(
        &self,
        entity_kind: &str,
        entity_id: i64,
    ) -> MetadataResult<Vec<String>>;

    /// Enqueue or refresh an artifact job. One job exists per
    /// (entity, asset); a changed source URL resets attempts and state.
    async fn upsert_artifact_job(&self, job: &ArtifactJobRow) -> MetadataResult<()>;

    /// Get an artifact job by ID.
    async fn get_artifact_job(&self, job_id: Uuid) -> MetadataResult<Option<ArtifactJobRow>>;

    /// Get pending artifact jobs, oldest first.
    async fn get_pending_artifact_jobs(&self, limit: u32) -> MetadataResult<Vec<ArtifactJobRow>>;

    /// Record the outcome of a processing attempt.
    async fn update_artifact_job(
        &self,
        job_id: Uuid,
        state: &str,
        attempts: i64,
        last_error: Option<&str>,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// List permanently failed artifact jobs for the admin surface.
    async fn list_failed_artifact_jobs(&self, limit: u32) -> MetadataResult<Vec<ArtifactJobRow>>;
}

/// Artifact job states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactJobState {
    Pending,
    Succeeded,
    /// Out of attempts; will not be retried automatically.
    FailedPermanent,
}

impl ArtifactJobState {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "succeeded" => Some(Self::Succeeded),
            "failed_permanent" => Some(Self::FailedPermanent),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::FailedPermanent => "failed_permanent",
        }
    }
}
