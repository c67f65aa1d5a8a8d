//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{CredentialRepo, EntryRepo, SyncJobRepo, VariantRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    CredentialRepo + EntryRepo + SyncJobRepo + VariantRepo + Send + Sync
{
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection avoids
            // persistent "database is locked" failures under axum concurrency.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;

        // Migrate credentials: add is_admin column if missing. Early schemas
        // modeled admin as a separate table; SQLite has no ADD COLUMN IF NOT
        // EXISTS, so check first.
        let columns: Vec<(i32, String, String, i32, Option<String>, i32)> =
            sqlx::query_as("PRAGMA table_info(credentials)")
                .fetch_all(&self.pool)
                .await?;
        let has_is_admin = columns.iter().any(|(_, name, _, _, _, _)| name == "is_admin");
        if !has_is_admin {
            sqlx::query("ALTER TABLE credentials ADD COLUMN is_admin INTEGER NOT NULL DEFAULT 0")
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[async_trait]
    impl CredentialRepo for SqliteStore {
        async fn create_credential(&self, row: &CredentialRow) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                INSERT INTO credentials (
                    credential_id, key_id, name, description,
                    secret_salt, secret_hash, pin_salt, pin_hash,
                    active, is_admin, rate_limit_per_minute,
                    expires_at, last_used_at, total_requests, created_by, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(row.credential_id)
            .bind(&row.key_id)
            .bind(&row.name)
            .bind(&row.description)
            .bind(&row.secret_salt)
            .bind(&row.secret_hash)
            .bind(&row.pin_salt)
            .bind(&row.pin_hash)
            .bind(row.active)
            .bind(row.is_admin)
            .bind(row.rate_limit_per_minute)
            .bind(row.expires_at)
            .bind(row.last_used_at)
            .bind(row.total_requests)
            .bind(&row.created_by)
            .bind(row.created_at)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => Ok(()),
                Err(e) => {
                    let err = MetadataError::from(e);
                    if err.is_unique_violation() {
                        Err(MetadataError::AlreadyExists(format!(
                            "key_id '{}' already exists",
                            row.key_id
                        )))
                    } else {
                        Err(err)
                    }
                }
            }
        }

        async fn get_credential(
            &self,
            credential_id: Uuid,
        ) -> MetadataResult<Option<CredentialRow>> {
            let row = sqlx::query_as::<_, CredentialRow>(
                "SELECT * FROM credentials WHERE credential_id = ?",
            )
            .bind(credential_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_credential_by_key_id(
            &self,
            key_id: &str,
        ) -> MetadataResult<Option<CredentialRow>> {
            let row =
                sqlx::query_as::<_, CredentialRow>("SELECT * FROM credentials WHERE key_id = ?")
                    .bind(key_id)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn update_credential(&self, row: &CredentialRow) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                UPDATE credentials
                SET name = ?, description = ?, active = ?,
                    rate_limit_per_minute = ?, expires_at = ?
                WHERE credential_id = ?
                "#,
            )
            .bind(&row.name)
            .bind(&row.description)
            .bind(row.active)
            .bind(row.rate_limit_per_minute)
            .bind(row.expires_at)
            .bind(row.credential_id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "credential {} not found",
                    row.credential_id
                )));
            }
            Ok(())
        }

        async fn touch_credential(
            &self,
            credential_id: Uuid,
            used_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            sqlx::query(
                "UPDATE credentials SET last_used_at = ?, total_requests = total_requests + 1 \
                 WHERE credential_id = ?",
            )
            .bind(used_at)
            .bind(credential_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn delete_credential(&self, credential_id: Uuid) -> MetadataResult<()> {
            let result = sqlx::query("DELETE FROM credentials WHERE credential_id = ?")
                .bind(credential_id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "credential {credential_id} not found"
                )));
            }
            Ok(())
        }

        async fn list_credentials(&self) -> MetadataResult<Vec<CredentialRow>> {
            let rows = sqlx::query_as::<_, CredentialRow>(
                "SELECT * FROM credentials ORDER BY created_at DESC",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl EntryRepo for SqliteStore {
        async fn upsert_entry(&self, row: &CacheEntryRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO cache_entries (
                    entity_kind, entity_id, payload, data_class, refreshed_at,
                    delete_candidate_at, deleted_at, created_at
                ) VALUES (?, ?, ?, ?, ?, NULL, NULL, ?)
                ON CONFLICT (entity_kind, entity_id) DO UPDATE SET
                    payload = excluded.payload,
                    data_class = excluded.data_class,
                    refreshed_at = excluded.refreshed_at,
                    delete_candidate_at = NULL,
                    deleted_at = NULL
                "#,
            )
            .bind(&row.entity_kind)
            .bind(row.entity_id)
            .bind(&row.payload)
            .bind(&row.data_class)
            .bind(row.refreshed_at)
            .bind(row.created_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_entry(
            &self,
            entity_kind: &str,
            entity_id: i64,
        ) -> MetadataResult<Option<CacheEntryRow>> {
            let row = sqlx::query_as::<_, CacheEntryRow>(
                "SELECT * FROM cache_entries \
                 WHERE entity_kind = ? AND entity_id = ? AND deleted_at IS NULL",
            )
            .bind(entity_kind)
            .bind(entity_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_entry_any(
            &self,
            entity_kind: &str,
            entity_id: i64,
        ) -> MetadataResult<Option<CacheEntryRow>> {
            let row = sqlx::query_as::<_, CacheEntryRow>(
                "SELECT * FROM cache_entries WHERE entity_kind = ? AND entity_id = ?",
            )
            .bind(entity_kind)
            .bind(entity_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_entry_ids(&self, entity_kind: &str) -> MetadataResult<Vec<i64>> {
            let ids: Vec<i64> = sqlx::query_scalar(
                "SELECT entity_id FROM cache_entries \
                 WHERE entity_kind = ? AND deleted_at IS NULL ORDER BY entity_id",
            )
            .bind(entity_kind)
            .fetch_all(&self.pool)
            .await?;
            Ok(ids)
        }

        async fn mark_delete_candidate(
            &self,
            entity_kind: &str,
            entity_id: i64,
            at: OffsetDateTime,
        ) -> MetadataResult<()> {
            // Keep the earliest marker; a candidate re-marked by a later full
            // sync should not have its clock reset.
            sqlx::query(
                "UPDATE cache_entries SET delete_candidate_at = COALESCE(delete_candidate_at, ?) \
                 WHERE entity_kind = ? AND entity_id = ? AND deleted_at IS NULL",
            )
            .bind(at)
            .bind(entity_kind)
            .bind(entity_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn clear_delete_candidate(
            &self,
            entity_kind: &str,
            entity_id: i64,
        ) -> MetadataResult<()> {
            sqlx::query(
                "UPDATE cache_entries SET delete_candidate_at = NULL \
                 WHERE entity_kind = ? AND entity_id = ?",
            )
            .bind(entity_kind)
            .bind(entity_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn list_delete_candidates(&self) -> MetadataResult<Vec<(String, i64)>> {
            let rows: Vec<(String, i64)> = sqlx::query_as(
                "SELECT entity_kind, entity_id FROM cache_entries \
                 WHERE delete_candidate_at IS NOT NULL AND deleted_at IS NULL \
                 ORDER BY delete_candidate_at",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn soft_delete_entry(
            &self,
            entity_kind: &str,
            entity_id: i64,
            at: OffsetDateTime,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE cache_entries SET deleted_at = ?, delete_candidate_at = NULL \
                 WHERE entity_kind = ? AND entity_id = ? AND deleted_at IS NULL",
            )
            .bind(at)
            .bind(entity_kind)
            .bind(entity_id)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "entry {entity_kind}/{entity_id} not found or already deleted"
                )));
            }
            Ok(())
        }

        async fn purge_deleted_entries(
            &self,
            cutoff: OffsetDateTime,
        ) -> MetadataResult<Vec<(String, i64)>> {
            // Atomic select-and-delete so a concurrent resurrecting upsert
            // cannot slip between the read and the delete.
            let rows: Vec<(String, i64)> = sqlx::query_as(
                "DELETE FROM cache_entries \
                 WHERE deleted_at IS NOT NULL AND deleted_at < ? \
                 RETURNING entity_kind, entity_id",
            )
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn count_entries(&self, entity_kind: &str) -> MetadataResult<u64> {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM cache_entries \
                 WHERE entity_kind = ? AND deleted_at IS NULL",
            )
            .bind(entity_kind)
            .fetch_one(&self.pool)
            .await?;
            Ok(count as u64)
        }
    }

    #[async_trait]
    impl SyncJobRepo for SqliteStore {
        async fn create_sync_job(&self, job: &SyncJobRow) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                INSERT INTO sync_jobs (
                    job_id, job_kind, state, target_kind, target_id,
                    created_at, started_at, finished_at, stats, error
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(job.job_id)
            .bind(&job.job_kind)
            .bind(&job.state)
            .bind(&job.target_kind)
            .bind(job.target_id)
            .bind(job.created_at)
            .bind(job.started_at)
            .bind(job.finished_at)
            .bind(&job.stats)
            .bind(&job.error)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => Ok(()),
                Err(e) => {
                    let err = MetadataError::from(e);
                    if err.is_unique_violation() {
                        // The partial unique index on active jobs rejected a
                        // second concurrent job of the same kind.
                        Err(MetadataError::AlreadyExists(format!(
                            "an active {} job already exists",
                            job.job_kind
                        )))
                    } else {
                        Err(err)
                    }
                }
            }
        }

        async fn get_sync_job(&self, job_id: Uuid) -> MetadataResult<Option<SyncJobRow>> {
            let row = sqlx::query_as::<_, SyncJobRow>("SELECT * FROM sync_jobs WHERE job_id = ?")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn update_sync_job_state(
            &self,
            job_id: Uuid,
            state: &str,
            started_at: Option<OffsetDateTime>,
            finished_at: Option<OffsetDateTime>,
            stats_json: Option<&str>,
            error: Option<&str>,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                UPDATE sync_jobs
                SET state = ?,
                    started_at = COALESCE(?, started_at),
                    finished_at = COALESCE(?, finished_at),
                    stats = COALESCE(?, stats),
                    error = COALESCE(?, error)
                WHERE job_id = ?
                "#,
            )
            .bind(state)
            .bind(started_at)
            .bind(finished_at)
            .bind(stats_json)
            .bind(error)
            .bind(job_id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("job {job_id} not found")));
            }
            Ok(())
        }

        async fn get_recent_sync_jobs(&self, limit: u32) -> MetadataResult<Vec<SyncJobRow>> {
            let rows = sqlx::query_as::<_, SyncJobRow>(
                "SELECT * FROM sync_jobs ORDER BY created_at DESC LIMIT ?",
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn get_orphaned_sync_jobs(&self) -> MetadataResult<Vec<SyncJobRow>> {
            let rows = sqlx::query_as::<_, SyncJobRow>(
                "SELECT * FROM sync_jobs WHERE state IN ('queued', 'running')",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn get_sync_cursor(&self, source: &str) -> MetadataResult<Option<String>> {
            let cursor: Option<String> =
                sqlx::query_scalar("SELECT cursor FROM sync_cursors WHERE source = ?")
                    .bind(source)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(cursor)
        }

        async fn set_sync_cursor(
            &self,
            source: &str,
            cursor: &str,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO sync_cursors (source, cursor, updated_at) VALUES (?, ?, ?)
                ON CONFLICT (source) DO UPDATE SET
                    cursor = excluded.cursor,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(source)
            .bind(cursor)
            .bind(updated_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        }
    }

    #[async_trait]
    impl VariantRepo for SqliteStore {
        async fn replace_variants(
            &self,
            entity_kind: &str,
            entity_id: i64,
            asset_kind: &str,
            variants: &[ArtifactVariantRow],
        ) -> MetadataResult<()> {
            let mut tx = self.pool.begin().await?;

            sqlx::query(
                "DELETE FROM artifact_variants \
                 WHERE entity_kind = ? AND entity_id = ? AND asset_kind = ?",
            )
            .bind(entity_kind)
            .bind(entity_id)
            .bind(asset_kind)
            .execute(&mut *tx)
            .await?;

            for variant in variants {
                sqlx::query(
                    r#"
                    INSERT INTO artifact_variants (
                        entity_kind, entity_id, asset_kind, size_class,
                        storage_key, byte_size, format, width, height, processed_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&variant.entity_kind)
                .bind(variant.entity_id)
                .bind(&variant.asset_kind)
                .bind(&variant.size_class)
                .bind(&variant.storage_key)
                .bind(variant.byte_size)
                .bind(&variant.format)
                .bind(variant.width)
                .bind(variant.height)
                .bind(variant.processed_at)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok(())
        }

        async fn get_variants(
            &self,
            entity_kind: &str,
            entity_id: i64,
        ) -> MetadataResult<Vec<ArtifactVariantRow>> {
            let rows = sqlx::query_as::<_, ArtifactVariantRow>(
                "SELECT * FROM artifact_variants \
                 WHERE entity_kind = ? AND entity_id = ? \
                 ORDER BY asset_kind, size_class",
            )
            .bind(entity_kind)
            .bind(entity_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn delete_variants_for_entity(
            &self,
            entity_kind: &str,
            entity_id: i64,
        ) -> MetadataResult<Vec<String>> {
            let keys: Vec<String> = sqlx::query_scalar(
                "DELETE FROM artifact_variants \
                 WHERE entity_kind = ? AND entity_id = ? \
                 RETURNING storage_key",
            )
            .bind(entity_kind)
            .bind(entity_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(keys)
        }

        async fn get_variant_keys(
            &self,
            entity_kind: &str,
            entity_id: i64,
        ) -> MetadataResult<Vec<String>> {
            let keys: Vec<String> = sqlx::query_scalar(
                "SELECT storage_key FROM artifact_variants \
                 WHERE entity_kind = ? AND entity_id = ?",
            )
            .bind(entity_kind)
            .bind(entity_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(keys)
        }

        async fn upsert_artifact_job(&self, job: &ArtifactJobRow) -> MetadataResult<()> {
            // A changed source URL resets the job: new artwork supersedes any
            // previous permanent failure.
            sqlx::query(
                r#"
                INSERT INTO artifact_jobs (
                    job_id, entity_kind, entity_id, asset_kind, source_url,
                    state, attempts, last_error, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (entity_kind, entity_id, asset_kind) DO UPDATE SET
                    source_url = excluded.source_url,
                    updated_at = excluded.updated_at,
                    state = CASE
                        WHEN artifact_jobs.source_url != excluded.source_url
                        THEN 'pending' ELSE artifact_jobs.state END,
                    attempts = CASE
                        WHEN artifact_jobs.source_url != excluded.source_url
                        THEN 0 ELSE artifact_jobs.attempts END,
                    last_error = CASE
                        WHEN artifact_jobs.source_url != excluded.source_url
                        THEN NULL ELSE artifact_jobs.last_error END
                "#,
            )
            .bind(job.job_id)
            .bind(&job.entity_kind)
            .bind(job.entity_id)
            .bind(&job.asset_kind)
            .bind(&job.source_url)
            .bind(&job.state)
            .bind(job.attempts)
            .bind(&job.last_error)
            .bind(job.created_at)
            .bind(job.updated_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_artifact_job(&self, job_id: Uuid) -> MetadataResult<Option<ArtifactJobRow>> {
            let row =
                sqlx::query_as::<_, ArtifactJobRow>("SELECT * FROM artifact_jobs WHERE job_id = ?")
                    .bind(job_id)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn get_pending_artifact_jobs(
            &self,
            limit: u32,
        ) -> MetadataResult<Vec<ArtifactJobRow>> {
            let rows = sqlx::query_as::<_, ArtifactJobRow>(
                "SELECT * FROM artifact_jobs WHERE state = 'pending' \
                 ORDER BY updated_at ASC LIMIT ?",
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn update_artifact_job(
            &self,
            job_id: Uuid,
            state: &str,
            attempts: i64,
            last_error: Option<&str>,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE artifact_jobs \
                 SET state = ?, attempts = ?, last_error = ?, updated_at = ? \
                 WHERE job_id = ?",
            )
            .bind(state)
            .bind(attempts)
            .bind(last_error)
            .bind(updated_at)
            .bind(job_id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "artifact job {job_id} not found"
                )));
            }
            Ok(())
        }

        async fn list_failed_artifact_jobs(
            &self,
            limit: u32,
        ) -> MetadataResult<Vec<ArtifactJobRow>> {
            let rows = sqlx::query_as::<_, ArtifactJobRow>(
                "SELECT * FROM artifact_jobs WHERE state = 'failed_permanent' \
                 ORDER BY updated_at DESC LIMIT ?",
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS credentials (
    credential_id TEXT PRIMARY KEY,
    key_id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    description TEXT,
    secret_salt TEXT NOT NULL,
    secret_hash TEXT NOT NULL,
    pin_salt TEXT,
    pin_hash TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    is_admin INTEGER NOT NULL DEFAULT 0,
    rate_limit_per_minute INTEGER NOT NULL DEFAULT 100,
    expires_at TEXT,
    last_used_at TEXT,
    total_requests INTEGER NOT NULL DEFAULT 0,
    created_by TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cache_entries (
    entity_kind TEXT NOT NULL,
    entity_id INTEGER NOT NULL,
    payload TEXT NOT NULL,
    data_class TEXT NOT NULL,
    refreshed_at TEXT NOT NULL,
    delete_candidate_at TEXT,
    deleted_at TEXT,
    created_at TEXT NOT NULL,
    PRIMARY KEY (entity_kind, entity_id)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_candidates
    ON cache_entries(delete_candidate_at)
    WHERE delete_candidate_at IS NOT NULL;

CREATE INDEX IF NOT EXISTS idx_cache_entries_deleted
    ON cache_entries(deleted_at)
    WHERE deleted_at IS NOT NULL;

CREATE TABLE IF NOT EXISTS sync_jobs (
    job_id TEXT PRIMARY KEY,
    job_kind TEXT NOT NULL,
    state TEXT NOT NULL,
    target_kind TEXT,
    target_id INTEGER,
    created_at TEXT NOT NULL,
    started_at TEXT,
    finished_at TEXT,
    stats TEXT,
    error TEXT
);

-- Job isolation: at most one active full/incremental/cleanup job per kind.
-- Targeted jobs are exempt; they are deduplicated in the refresh queue.
CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_jobs_kind_active
    ON sync_jobs(job_kind)
    WHERE state IN ('queued', 'running') AND job_kind != 'targeted';

CREATE INDEX IF NOT EXISTS idx_sync_jobs_created
    ON sync_jobs(created_at DESC);

CREATE TABLE IF NOT EXISTS sync_cursors (
    source TEXT PRIMARY KEY,
    cursor TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS artifact_variants (
    entity_kind TEXT NOT NULL,
    entity_id INTEGER NOT NULL,
    asset_kind TEXT NOT NULL,
    size_class TEXT NOT NULL,
    storage_key TEXT NOT NULL,
    byte_size INTEGER NOT NULL,
    format TEXT NOT NULL,
    width INTEGER NOT NULL,
    height INTEGER NOT NULL,
    processed_at TEXT NOT NULL,
    PRIMARY KEY (entity_kind, entity_id, asset_kind, size_class)
);

CREATE INDEX IF NOT EXISTS idx_artifact_variants_entity
    ON artifact_variants(entity_kind, entity_id);

CREATE TABLE IF NOT EXISTS artifact_jobs (
    job_id TEXT PRIMARY KEY,
    entity_kind TEXT NOT NULL,
    entity_id INTEGER NOT NULL,
    asset_kind TEXT NOT NULL,
    source_url TEXT NOT NULL,
    state TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (entity_kind, entity_id, asset_kind)
);

CREATE INDEX IF NOT EXISTS idx_artifact_jobs_state
    ON artifact_jobs(state, updated_at);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::*;
    use time::OffsetDateTime;
    use uuid::Uuid;

    async fn test_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("metadata.db"))
            .await
            .unwrap();
        (dir, store)
    }

    fn credential_row(key_id: &str) -> CredentialRow {
        CredentialRow {
            credential_id: Uuid::new_v4(),
            key_id: key_id.to_string(),
            name: "test".to_string(),
            description: None,
            secret_salt: "aa".repeat(16),
            secret_hash: "bb".repeat(32),
            pin_salt: None,
            pin_hash: None,
            active: true,
            is_admin: false,
            rate_limit_per_minute: 100,
            expires_at: None,
            last_used_at: None,
            total_requests: 0,
            created_by: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    fn entry_row(kind: &str, id: i64) -> CacheEntryRow {
        let now = OffsetDateTime::now_utc();
        CacheEntryRow {
            entity_kind: kind.to_string(),
            entity_id: id,
            payload: format!(r#"{{"id":{id}}}"#),
            data_class: "dynamic".to_string(),
            refreshed_at: now,
            delete_candidate_at: None,
            deleted_at: None,
            created_at: now,
        }
    }

    fn variant_row(kind: &str, id: i64, size: &str) -> ArtifactVariantRow {
        ArtifactVariantRow {
            entity_kind: kind.to_string(),
            entity_id: id,
            asset_kind: "poster".to_string(),
            size_class: size.to_string(),
            storage_key: format!("{kind}/aa/bb/{id}/poster/{size}.jpg"),
            byte_size: 1024,
            format: "jpeg".to_string(),
            width: 100,
            height: 150,
            processed_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn test_credential_lifecycle() {
        let (_dir, store) = test_store().await;

        let row = credential_row("mq_k_one");
        store.create_credential(&row).await.unwrap();

        let found = store
            .get_credential_by_key_id("mq_k_one")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.credential_id, row.credential_id);
        assert!(found.active);

        // duplicate key_id is rejected
        let dup = credential_row("mq_k_one");
        let err = store.create_credential(&dup).await.unwrap_err();
        assert!(matches!(err, MetadataError::AlreadyExists(_)));

        // touch bumps usage
        store
            .touch_credential(row.credential_id, OffsetDateTime::now_utc())
            .await
            .unwrap();
        store
            .touch_credential(row.credential_id, OffsetDateTime::now_utc())
            .await
            .unwrap();
        let touched = store
            .get_credential(row.credential_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(touched.total_requests, 2);
        assert!(touched.last_used_at.is_some());

        // deactivate via update
        let mut updated = found.clone();
        updated.active = false;
        store.update_credential(&updated).await.unwrap();
        let after = store
            .get_credential(row.credential_id)
            .await
            .unwrap()
            .unwrap();
        assert!(!after.active);

        store.delete_credential(row.credential_id).await.unwrap();
        assert!(
            store
                .get_credential(row.credential_id)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_entry_upsert_is_idempotent() {
        let (_dir, store) = test_store().await;

        let row = entry_row("series", 42);
        store.upsert_entry(&row).await.unwrap();
        store.upsert_entry(&row).await.unwrap();

        assert_eq!(store.count_entries("series").await.unwrap(), 1);
        let found = store.get_entry("series", 42).await.unwrap().unwrap();
        assert_eq!(found.payload, r#"{"id":42}"#);
    }

    #[tokio::test]
    async fn test_soft_deleted_entries_are_invisible() {
        let (_dir, store) = test_store().await;

        store.upsert_entry(&entry_row("series", 7)).await.unwrap();
        store
            .soft_delete_entry("series", 7, OffsetDateTime::now_utc())
            .await
            .unwrap();

        // invisible to reads, still present underneath
        assert!(store.get_entry("series", 7).await.unwrap().is_none());
        assert!(store.get_entry_any("series", 7).await.unwrap().is_some());
        assert_eq!(store.count_entries("series").await.unwrap(), 0);

        // a fresh upsert resurrects the entity
        store.upsert_entry(&entry_row("series", 7)).await.unwrap();
        assert!(store.get_entry("series", 7).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_candidate_flow() {
        let (_dir, store) = test_store().await;
        let now = OffsetDateTime::now_utc();

        store.upsert_entry(&entry_row("movie", 1)).await.unwrap();
        store.upsert_entry(&entry_row("movie", 2)).await.unwrap();

        store.mark_delete_candidate("movie", 2, now).await.unwrap();
        let candidates = store.list_delete_candidates().await.unwrap();
        assert_eq!(candidates, vec![("movie".to_string(), 2)]);

        // re-marking keeps the earliest timestamp
        store
            .mark_delete_candidate("movie", 2, now + time::Duration::hours(1))
            .await
            .unwrap();
        let row = store.get_entry("movie", 2).await.unwrap().unwrap();
        let marked = row.delete_candidate_at.unwrap();
        assert!((marked - now).whole_seconds().abs() < 2);

        store.clear_delete_candidate("movie", 2).await.unwrap();
        assert!(store.list_delete_candidates().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_purge_respects_retention_cutoff() {
        let (_dir, store) = test_store().await;
        let now = OffsetDateTime::now_utc();

        store.upsert_entry(&entry_row("series", 1)).await.unwrap();
        store.upsert_entry(&entry_row("series", 2)).await.unwrap();

        store
            .soft_delete_entry("series", 1, now - time::Duration::days(40))
            .await
            .unwrap();
        store
            .soft_delete_entry("series", 2, now - time::Duration::days(5))
            .await
            .unwrap();

        let purged = store
            .purge_deleted_entries(now - time::Duration::days(30))
            .await
            .unwrap();
        assert_eq!(purged, vec![("series".to_string(), 1)]);

        // the recent tombstone survives
        assert!(store.get_entry_any("series", 2).await.unwrap().is_some());
        assert!(store.get_entry_any("series", 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sync_job_kind_mutex() {
        let (_dir, store) = test_store().await;
        let now = OffsetDateTime::now_utc();

        let job = SyncJobRow {
            job_id: Uuid::new_v4(),
            job_kind: "full".to_string(),
            state: "queued".to_string(),
            target_kind: None,
            target_id: None,
            created_at: now,
            started_at: None,
            finished_at: None,
            stats: None,
            error: None,
        };
        store.create_sync_job(&job).await.unwrap();

        // second active full job is rejected
        let dup = SyncJobRow {
            job_id: Uuid::new_v4(),
            ..job.clone()
        };
        let err = store.create_sync_job(&dup).await.unwrap_err();
        assert!(matches!(err, MetadataError::AlreadyExists(_)));

        // a different kind is fine
        let incr = SyncJobRow {
            job_id: Uuid::new_v4(),
            job_kind: "incremental".to_string(),
            ..job.clone()
        };
        store.create_sync_job(&incr).await.unwrap();

        // finishing the first admits a new full job
        store
            .update_sync_job_state(job.job_id, "succeeded", Some(now), Some(now), None, None)
            .await
            .unwrap();
        store.create_sync_job(&dup).await.unwrap();

        // targeted jobs never contend
        for _ in 0..3 {
            let targeted = SyncJobRow {
                job_id: Uuid::new_v4(),
                job_kind: "targeted".to_string(),
                target_kind: Some("series".to_string()),
                target_id: Some(42),
                ..job.clone()
            };
            store.create_sync_job(&targeted).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_orphaned_jobs_listed() {
        let (_dir, store) = test_store().await;
        let now = OffsetDateTime::now_utc();

        let running = SyncJobRow {
            job_id: Uuid::new_v4(),
            job_kind: "incremental".to_string(),
            state: "running".to_string(),
            target_kind: None,
            target_id: None,
            created_at: now,
            started_at: Some(now),
            finished_at: None,
            stats: None,
            error: None,
        };
        store.create_sync_job(&running).await.unwrap();

        let orphans = store.get_orphaned_sync_jobs().await.unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].job_id, running.job_id);
    }

    #[tokio::test]
    async fn test_cursor_commit_roundtrip() {
        let (_dir, store) = test_store().await;
        let now = OffsetDateTime::now_utc();

        assert!(store.get_sync_cursor("updates").await.unwrap().is_none());

        store.set_sync_cursor("updates", "1700000000", now).await.unwrap();
        assert_eq!(
            store.get_sync_cursor("updates").await.unwrap().as_deref(),
            Some("1700000000")
        );

        store.set_sync_cursor("updates", "1700000600", now).await.unwrap();
        assert_eq!(
            store.get_sync_cursor("updates").await.unwrap().as_deref(),
            Some("1700000600")
        );
    }

    #[tokio::test]
    async fn test_replace_variants_swaps_whole_set() {
        let (_dir, store) = test_store().await;

        let first: Vec<_> = ["original", "large", "medium", "small", "thumbnail"]
            .iter()
            .map(|size| variant_row("series", 42, size))
            .collect();
        store
            .replace_variants("series", 42, "poster", &first)
            .await
            .unwrap();
        assert_eq!(store.get_variants("series", 42).await.unwrap().len(), 5);

        // replacing publishes the new set and only the new set
        let second = vec![variant_row("series", 42, "original")];
        store
            .replace_variants("series", 42, "poster", &second)
            .await
            .unwrap();
        let variants = store.get_variants("series", 42).await.unwrap();
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].size_class, "original");
    }

    #[tokio::test]
    async fn test_artifact_job_reset_on_new_source() {
        let (_dir, store) = test_store().await;
        let now = OffsetDateTime::now_utc();

        let job = ArtifactJobRow {
            job_id: Uuid::new_v4(),
            entity_kind: "series".to_string(),
            entity_id: 42,
            asset_kind: "poster".to_string(),
            source_url: "https://img.example/1.jpg".to_string(),
            state: "pending".to_string(),
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        store.upsert_artifact_job(&job).await.unwrap();

        // exhaust the job
        store
            .update_artifact_job(job.job_id, "failed_permanent", 3, Some("boom"), now)
            .await
            .unwrap();
        assert_eq!(store.list_failed_artifact_jobs(10).await.unwrap().len(), 1);

        // same asset, new source URL: job resets to pending
        let refreshed = ArtifactJobRow {
            job_id: Uuid::new_v4(),
            source_url: "https://img.example/2.jpg".to_string(),
            ..job.clone()
        };
        store.upsert_artifact_job(&refreshed).await.unwrap();

        let pending = store.get_pending_artifact_jobs(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 0);
        assert_eq!(pending[0].source_url, "https://img.example/2.jpg");

        // same source URL again: no reset
        store
            .update_artifact_job(pending[0].job_id, "failed_permanent", 3, Some("boom"), now)
            .await
            .unwrap();
        store.upsert_artifact_job(&refreshed).await.unwrap();
        assert!(store.get_pending_artifact_jobs(10).await.unwrap().is_empty());
    }
}
