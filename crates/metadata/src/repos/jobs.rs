//! Sync job repository.

use crate::error::MetadataResult;
use crate::models::SyncJobRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for sync job and cursor operations.
#[async_trait]
pub trait SyncJobRepo: Send + Sync {
    /// Create a sync job. For full/incremental/cleanup kinds, a partial
    /// unique index admits at most one active (queued or running) job per
    /// kind; a duplicate insert fails with AlreadyExists.
    async fn create_sync_job(&self, job: &SyncJobRow) -> MetadataResult<()>;

    /// Get a sync job by ID.
    async fn get_sync_job(&self, job_id: Uuid) -> MetadataResult<Option<SyncJobRow>>;

    /// Update sync job state.
    async fn update_sync_job_state(
        &self,
        job_id: Uuid,
        state: &str,
        started_at: Option<OffsetDateTime>,
        finished_at: Option<OffsetDateTime>,
        stats_json: Option<&str>,
        error: Option<&str>,
    ) -> MetadataResult<()>;

    /// Get recent sync jobs, newest first.
    async fn get_recent_sync_jobs(&self, limit: u32) -> MetadataResult<Vec<SyncJobRow>>;

    /// Get jobs left queued or running by a previous process. These are
    /// orphans: queued means the process died before spawning the task,
    /// running means it died mid-job.
    async fn get_orphaned_sync_jobs(&self) -> MetadataResult<Vec<SyncJobRow>>;

    /// Get the sync cursor for a source, if one has been committed.
    async fn get_sync_cursor(&self, source: &str) -> MetadataResult<Option<String>>;

    /// Commit the sync cursor for a source. Called only after the batch that
    /// consumed the previous cursor has committed.
    async fn set_sync_cursor(
        &self,
        source: &str,
        cursor: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()>;
}

/// Sync job kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncJobKind {
    /// Walk every upstream listing and reconcile the durable tier.
    Full,
    /// Apply upstream changes since the committed cursor.
    Incremental,
    /// Refresh a single entity (and its children for series).
    Targeted,
    /// Verify delete candidates, purge expired tombstones, sweep orphans.
    Cleanup,
}

impl SyncJobKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "full" => Some(Self::Full),
            "incremental" => Some(Self::Incremental),
            "targeted" => Some(Self::Targeted),
            "cleanup" => Some(Self::Cleanup),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
            Self::Targeted => "targeted",
            Self::Cleanup => "cleanup",
        }
    }

    /// Whether at most one active job of this kind may exist.
    /// Targeted jobs are deduplicated upstream of the store instead.
    pub fn is_exclusive(&self) -> bool {
        !matches!(self, Self::Targeted)
    }
}

/// Sync job states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncJobState {
    Queued,
    Running,
    Succeeded,
    /// Finished, but some entities failed to apply.
    Partial,
    Failed,
}

impl SyncJobState {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Partial | Self::Failed)
    }
}

/// Sync job statistics.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SyncStats {
    /// Entities examined.
    pub examined: u64,
    /// Entities written to the durable tier.
    pub updated: u64,
    /// Entities that failed to apply.
    pub failed: u64,
    /// Entities marked candidate-for-deletion.
    pub marked_candidates: u64,
    /// Entities soft-deleted.
    pub soft_deleted: u64,
    /// Entities hard-deleted past the retention window.
    pub purged: u64,
    /// Orphaned storage objects removed.
    pub orphans_removed: u64,
}
