//! Durable cache entry repository.

use crate::error::MetadataResult;
use crate::models::CacheEntryRow;
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository for the durable cache tier.
#[async_trait]
pub trait EntryRepo: Send + Sync {
    /// Insert or overwrite an entry. Last writer wins at entity granularity.
    /// A successful upsert clears any tombstone or delete-candidate marker:
    /// the upstream just confirmed the entity exists.
    async fn upsert_entry(&self, row: &CacheEntryRow) -> MetadataResult<()>;

    /// Get a visible entry. Soft-deleted rows are treated as absent.
    async fn get_entry(&self, entity_kind: &str, entity_id: i64)
    -> MetadataResult<Option<CacheEntryRow>>;

    /// Get an entry regardless of tombstone state.
    async fn get_entry_any(
        &self,
        entity_kind: &str,
        entity_id: i64,
    ) -> MetadataResult<Option<CacheEntryRow>>;

    /// List ids of all visible entries of a kind.
    async fn list_entry_ids(&self, entity_kind: &str) -> MetadataResult<Vec<i64>>;

    /// Mark an entry as a deletion candidate (seen durably, absent upstream).
    async fn mark_delete_candidate(
        &self,
        entity_kind: &str,
        entity_id: i64,
        at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Clear a delete-candidate marker after the upstream re-confirmed the entity.
    async fn clear_delete_candidate(
        &self,
        entity_kind: &str,
        entity_id: i64,
    ) -> MetadataResult<()>;

    /// List all delete candidates as (kind, id) pairs.
    async fn list_delete_candidates(&self) -> MetadataResult<Vec<(String, i64)>>;

    /// Soft delete: set the tombstone, keeping the row recoverable.
    async fn soft_delete_entry(
        &self,
        entity_kind: &str,
        entity_id: i64,
        at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Hard delete rows soft-deleted before the cutoff. Returns the
    /// (kind, id) pairs removed so callers can drop dependent artifacts.
    async fn purge_deleted_entries(
        &self,
        cutoff: OffsetDateTime,
    ) -> MetadataResult<Vec<(String, i64)>>;

    /// Count visible entries per kind, for health and admin stats.
    async fn count_entries(&self, entity_kind: &str) -> MetadataResult<u64>;
}
