//! Background reconciliation engine.
//!
//! Runs full, incremental, targeted, and cleanup jobs against the durable
//! tier. Batch failures back off exponentially; three consecutive failures
//! abort the job. The incremental cursor only advances after the work that
//! consumed it has committed.

use crate::artifacts::ArtifactPipeline;
use crate::error::{SyncError, SyncResult};
use marquee_cache::TieredCache;
use marquee_core::config::SyncConfig;
use marquee_core::{EntityKey, EntityKind};
use marquee_metadata::models::SyncJobRow;
use marquee_metadata::repos::{SyncJobKind, SyncJobState, SyncStats};
use marquee_metadata::{MetadataError, MetadataStore};
use marquee_upstream::{UpstreamClient, UpstreamError};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Cursor source name for the upstream change feed.
const CHANGE_CURSOR: &str = "upstream_changes";

pub struct SyncEngine {
    store: Arc<dyn MetadataStore>,
    upstream: Arc<dyn UpstreamClient>,
    cache: Arc<TieredCache>,
    artifacts: Arc<ArtifactPipeline>,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        upstream: Arc<dyn UpstreamClient>,
        cache: Arc<TieredCache>,
        artifacts: Arc<ArtifactPipeline>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            upstream,
            cache,
            artifacts,
            config,
        }
    }

    /// Create a queued job row.
    ///
    /// Full, incremental, and cleanup jobs are exclusive per kind; a second
    /// trigger while one is active is rejected with `Conflict`.
    pub async fn enqueue(
        &self,
        kind: SyncJobKind,
        target: Option<EntityKey>,
    ) -> SyncResult<Uuid> {
        if kind == SyncJobKind::Targeted && target.is_none() {
            return Err(SyncError::Processing(
                "targeted sync requires an entity key".to_string(),
            ));
        }

        let job_id = Uuid::new_v4();
        let row = SyncJobRow {
            job_id,
            job_kind: kind.as_str().to_string(),
            state: SyncJobState::Queued.as_str().to_string(),
            target_kind: target.map(|t| t.kind.as_str().to_string()),
            target_id: target.map(|t| t.id),
            created_at: OffsetDateTime::now_utc(),
            started_at: None,
            finished_at: None,
            stats: None,
            error: None,
        };

        match self.store.create_sync_job(&row).await {
            Ok(()) => Ok(job_id),
            Err(MetadataError::AlreadyExists(_)) => {
                Err(SyncError::Conflict(kind.as_str().to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Execute a queued job to completion, recording the terminal state.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn run(&self, job_id: Uuid) -> SyncResult<SyncStats> {
        let job = self
            .store
            .get_sync_job(job_id)
            .await?
            .ok_or(SyncError::JobNotFound(job_id))?;
        let kind = SyncJobKind::parse(&job.job_kind).ok_or_else(|| {
            SyncError::Processing(format!("unknown job kind {}", job.job_kind))
        })?;

        let started_at = OffsetDateTime::now_utc();
        self.store
            .update_sync_job_state(
                job_id,
                SyncJobState::Running.as_str(),
                Some(started_at),
                None,
                None,
                None,
            )
            .await?;
        info!(kind = kind.as_str(), "sync job started");

        let mut stats = SyncStats::default();
        let outcome = match kind {
            SyncJobKind::Full => self.run_full(&mut stats, started_at).await,
            SyncJobKind::Incremental => self.run_incremental(&mut stats, started_at).await,
            SyncJobKind::Targeted => {
                let target = job_target(&job)?;
                self.run_targeted(target, &mut stats).await
            }
            SyncJobKind::Cleanup => self.run_cleanup(&mut stats).await,
        };

        let finished_at = OffsetDateTime::now_utc();
        let stats_json = serde_json::to_string(&stats).ok();
        let (state, error) = match &outcome {
            Ok(()) if stats.failed > 0 => (SyncJobState::Partial, None),
            Ok(()) => (SyncJobState::Succeeded, None),
            Err(err) => (SyncJobState::Failed, Some(err.to_string())),
        };

        self.store
            .update_sync_job_state(
                job_id,
                state.as_str(),
                None,
                Some(finished_at),
                stats_json.as_deref(),
                error.as_deref(),
            )
            .await?;
        info!(
            kind = kind.as_str(),
            state = state.as_str(),
            examined = stats.examined,
            updated = stats.updated,
            failed = stats.failed,
            "sync job finished"
        );

        outcome.map(|()| stats)
    }

    /// Walk the upstream catalog for every syncable kind, then mark durable
    /// entries the walk never saw as candidates for deletion.
    async fn run_full(&self, stats: &mut SyncStats, started_at: OffsetDateTime) -> SyncResult<()> {
        for kind in EntityKind::SYNCABLE {
            let mut seen: HashSet<i64> = HashSet::new();
            let mut page = 0u32;
            let mut consecutive_failures = 0u32;

            loop {
                let fetched = match self.upstream.fetch_page(kind, page).await {
                    Ok(fetched) => {
                        consecutive_failures = 0;
                        fetched
                    }
                    Err(err) => {
                        consecutive_failures += 1;
                        if consecutive_failures >= self.config.max_consecutive_failures {
                            return Err(SyncError::Aborted(format!(
                                "{} listing page {page} failed {consecutive_failures} times: {err}",
                                kind.as_str()
                            )));
                        }
                        let delay = self.config.backoff(consecutive_failures);
                        warn!(
                            kind = kind.as_str(),
                            page, error = %err, ?delay, "listing batch failed, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                };

                for item in &fetched.items {
                    stats.examined += 1;
                    match self.apply_listed(kind, item).await {
                        Ok(id) => {
                            seen.insert(id);
                            stats.updated += 1;
                        }
                        Err(err) => {
                            stats.failed += 1;
                            debug!(kind = kind.as_str(), error = %err, "skipping bad record");
                        }
                    }
                }

                match fetched.next_page {
                    Some(next) => page = next,
                    None => break,
                }
            }

            // Anything durable the walk did not touch is gone upstream until
            // proven otherwise.
            for id in self.store.list_entry_ids(kind.as_str()).await? {
                if !seen.contains(&id) {
                    self.store
                        .mark_delete_candidate(kind.as_str(), id, started_at)
                        .await?;
                    stats.marked_candidates += 1;
                }
            }
        }
        Ok(())
    }

    /// Apply upstream changes since the committed cursor, then advance it.
    async fn run_incremental(
        &self,
        stats: &mut SyncStats,
        started_at: OffsetDateTime,
    ) -> SyncResult<()> {
        let since = match self.store.get_sync_cursor(CHANGE_CURSOR).await? {
            Some(cursor) => cursor
                .parse::<i64>()
                .ok()
                .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok())
                .unwrap_or(started_at),
            // First run: establish the watermark without replaying history.
            None => started_at,
        };

        let mut page = 0u32;
        let mut consecutive_failures = 0u32;
        loop {
            let fetched = match self.upstream.changes_since(since, page).await {
                Ok(fetched) => {
                    consecutive_failures = 0;
                    fetched
                }
                Err(err) => {
                    consecutive_failures += 1;
                    if consecutive_failures >= self.config.max_consecutive_failures {
                        return Err(SyncError::Aborted(format!(
                            "change feed page {page} failed {consecutive_failures} times: {err}"
                        )));
                    }
                    let delay = self.config.backoff(consecutive_failures);
                    warn!(page, error = %err, ?delay, "change batch failed, backing off");
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            for change in &fetched.changes {
                stats.examined += 1;
                let key = EntityKey::new(change.kind, change.id);
                if change.deleted {
                    self.store
                        .soft_delete_entry(change.kind.as_str(), change.id, OffsetDateTime::now_utc())
                        .await?;
                    self.cache.invalidate(&key);
                    stats.soft_deleted += 1;
                    continue;
                }
                match self.refresh_entity(key).await {
                    Ok(()) => stats.updated += 1,
                    Err(SyncError::Upstream(UpstreamError::NotFound)) => {
                        // Changed then vanished; let cleanup re-verify.
                        self.store
                            .mark_delete_candidate(
                                change.kind.as_str(),
                                change.id,
                                OffsetDateTime::now_utc(),
                            )
                            .await?;
                        stats.marked_candidates += 1;
                    }
                    Err(err) => {
                        stats.failed += 1;
                        debug!(%key, error = %err, "change application failed");
                    }
                }
            }

            match fetched.next_page {
                Some(next) => page = next,
                None => break,
            }
        }

        // The watermark moves only after everything above is durably applied.
        self.store
            .set_sync_cursor(
                CHANGE_CURSOR,
                &started_at.unix_timestamp().to_string(),
                OffsetDateTime::now_utc(),
            )
            .await?;
        Ok(())
    }

    /// Refresh one entity, and for a series its episode list too.
    pub async fn run_targeted(&self, target: EntityKey, stats: &mut SyncStats) -> SyncResult<()> {
        stats.examined += 1;
        match self.refresh_entity(target).await {
            Ok(()) => stats.updated += 1,
            Err(SyncError::Upstream(UpstreamError::NotFound)) => {
                self.store
                    .mark_delete_candidate(
                        target.kind.as_str(),
                        target.id,
                        OffsetDateTime::now_utc(),
                    )
                    .await?;
                stats.marked_candidates += 1;
                return Ok(());
            }
            Err(err) => return Err(err),
        }

        if target.kind != EntityKind::Series {
            return Ok(());
        }

        let mut page = 0u32;
        loop {
            let fetched = self
                .upstream
                .fetch_series_episodes(target.id, page)
                .await?;
            for item in &fetched.items {
                stats.examined += 1;
                match self.apply_listed(EntityKind::Episode, item).await {
                    Ok(_) => stats.updated += 1,
                    Err(err) => {
                        stats.failed += 1;
                        debug!(series = target.id, error = %err, "skipping bad episode");
                    }
                }
            }
            match fetched.next_page {
                Some(next) => page = next,
                None => break,
            }
        }
        Ok(())
    }

    /// Re-verify delete candidates, purge expired tombstones, sweep orphans.
    async fn run_cleanup(&self, stats: &mut SyncStats) -> SyncResult<()> {
        for (kind_str, id) in self.store.list_delete_candidates().await? {
            let Ok(kind) = EntityKind::parse(&kind_str) else {
                warn!(kind = kind_str, id, "candidate with unknown kind, skipping");
                continue;
            };
            stats.examined += 1;

            // One targeted check against the upstream, not a full re-sync.
            match self.upstream.fetch(kind, id).await {
                Ok(payload) => {
                    // Still there: a transient gap, not a deletion.
                    self.apply_payload(EntityKey::new(kind, id), payload).await?;
                    stats.updated += 1;
                }
                Err(UpstreamError::NotFound) => {
                    self.store
                        .soft_delete_entry(&kind_str, id, OffsetDateTime::now_utc())
                        .await?;
                    self.cache.invalidate(&EntityKey::new(kind, id));
                    stats.soft_deleted += 1;
                }
                Err(err) => {
                    // Keep the candidate; a failed re-verification never
                    // deletes anything.
                    stats.failed += 1;
                    debug!(kind = kind_str, id, error = %err, "re-verification failed");
                }
            }
        }

        let cutoff = OffsetDateTime::now_utc() - self.config.retention();
        for (kind, id) in self.store.purge_deleted_entries(cutoff).await? {
            self.artifacts.delete_entity_artifacts(&kind, id).await?;
            stats.purged += 1;
        }

        stats.orphans_removed = self.artifacts.clean_orphans().await?;
        Ok(())
    }

    /// Fetch the extended record for a key and commit it.
    async fn refresh_entity(&self, key: EntityKey) -> SyncResult<()> {
        let payload = self.upstream.fetch(key.kind, key.id).await?;
        self.apply_payload(key, payload).await
    }

    /// Upsert a listed record, returning its id.
    async fn apply_listed(&self, kind: EntityKind, item: &Value) -> SyncResult<i64> {
        let id = item
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| SyncError::Processing("record without numeric id".to_string()))?;
        self.apply_payload(EntityKey::new(kind, id), item.clone())
            .await?;
        Ok(id)
    }

    /// Commit a payload through the cache (durable then hot) and enqueue
    /// artifact jobs for any image URLs it carries.
    async fn apply_payload(&self, key: EntityKey, payload: Value) -> SyncResult<()> {
        self.cache
            .upsert(key, payload.clone())
            .await
            .map_err(|e| SyncError::Processing(format!("cache upsert for {key}: {e}")))?;
        self.artifacts
            .enqueue_for_entity(key.kind, key.id, &payload)
            .await?;
        Ok(())
    }
}

fn job_target(job: &SyncJobRow) -> SyncResult<EntityKey> {
    let (Some(kind), Some(id)) = (&job.target_kind, job.target_id) else {
        return Err(SyncError::Processing(
            "targeted job without a target".to_string(),
        ));
    };
    let kind = EntityKind::parse(kind).map_err(|e| SyncError::Processing(e.to_string()))?;
    Ok(EntityKey::new(kind, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FailingStore, FakeUpstream};
    use marquee_core::config::{ArtifactConfig, CacheConfig};
    use marquee_metadata::SqliteStore;
    use marquee_metadata::models::CacheEntryRow;
    use marquee_metadata::repos::{EntryRepo, SyncJobRepo, VariantRepo};
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Harness {
        engine: SyncEngine,
        store: Arc<SqliteStore>,
        upstream: Arc<FakeUpstream>,
        cache: Arc<TieredCache>,
        _dir: tempfile::TempDir,
    }

    async fn harness(upstream: FakeUpstream) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            SqliteStore::new(&dir.path().join("engine-test.db"))
                .await
                .unwrap(),
        );
        let upstream = Arc::new(upstream);
        let (refresh_tx, _refresh_rx) = mpsc::unbounded_channel();
        let cache = Arc::new(TieredCache::new(
            store.clone(),
            upstream.clone(),
            CacheConfig::default(),
            refresh_tx,
        ));
        let objects = Arc::new(FailingStore::failing_after(usize::MAX));
        let artifacts = Arc::new(ArtifactPipeline::new(
            store.clone(),
            objects,
            upstream.clone(),
            ArtifactConfig::default(),
        ));
        let mut config = SyncConfig::default();
        config.backoff_base_ms = 1;
        config.backoff_cap_ms = 5;
        let engine = SyncEngine::new(
            store.clone(),
            upstream.clone(),
            cache.clone(),
            artifacts,
            config,
        );
        Harness {
            engine,
            store,
            upstream,
            cache,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_full_sync_marks_unseen_entries_as_candidates() {
        let h = harness(FakeUpstream::new()).await;
        h.upstream.insert_page(
            EntityKind::Series,
            0,
            vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 3})],
            None,
        );

        // Durable tier already knows id 4.
        let now = OffsetDateTime::now_utc();
        h.store
            .upsert_entry(&CacheEntryRow {
                entity_kind: "series".to_string(),
                entity_id: 4,
                payload: json!({"id": 4}).to_string(),
                data_class: "dynamic".to_string(),
                refreshed_at: now,
                delete_candidate_at: None,
                deleted_at: None,
                created_at: now,
            })
            .await
            .unwrap();

        let job_id = h.engine.enqueue(SyncJobKind::Full, None).await.unwrap();
        let stats = h.engine.run(job_id).await.unwrap();

        assert_eq!(stats.updated, 3);
        assert_eq!(stats.marked_candidates, 1);
        let candidates = h.store.list_delete_candidates().await.unwrap();
        assert_eq!(candidates, vec![("series".to_string(), 4)]);

        let job = h.store.get_sync_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.state, "succeeded");
        assert!(job.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_conflicts_until_finished() {
        let h = harness(FakeUpstream::new()).await;

        let job_id = h.engine.enqueue(SyncJobKind::Full, None).await.unwrap();
        assert!(matches!(
            h.engine.enqueue(SyncJobKind::Full, None).await,
            Err(SyncError::Conflict(_))
        ));
        // A different kind is admitted.
        h.engine.enqueue(SyncJobKind::Cleanup, None).await.unwrap();

        h.engine.run(job_id).await.unwrap();
        h.engine.enqueue(SyncJobKind::Full, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_incremental_replay_is_idempotent() {
        let h = harness(FakeUpstream::new()).await;
        h.upstream
            .insert_entity(EntityKind::Series, 10, json!({"id": 10, "name": "Show"}));
        h.upstream.set_changes(vec![marquee_upstream::Change {
            kind: EntityKind::Series,
            id: 10,
            deleted: false,
        }]);

        let first = h.engine.enqueue(SyncJobKind::Incremental, None).await.unwrap();
        let stats = h.engine.run(first).await.unwrap();
        assert_eq!(stats.updated, 1);
        let cursor = h.store.get_sync_cursor("upstream_changes").await.unwrap();
        assert!(cursor.is_some());

        // Replaying the same change set converges to the same state.
        let second = h.engine.enqueue(SyncJobKind::Incremental, None).await.unwrap();
        h.engine.run(second).await.unwrap();

        let entry = h.store.get_entry("series", 10).await.unwrap().unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&entry.payload).unwrap()["name"],
            "Show"
        );
    }

    #[tokio::test]
    async fn test_incremental_delete_change_tombstones_entry() {
        let h = harness(FakeUpstream::new()).await;
        let now = OffsetDateTime::now_utc();
        h.store
            .upsert_entry(&CacheEntryRow {
                entity_kind: "movie".to_string(),
                entity_id: 3,
                payload: json!({"id": 3}).to_string(),
                data_class: "static".to_string(),
                refreshed_at: now,
                delete_candidate_at: None,
                deleted_at: None,
                created_at: now,
            })
            .await
            .unwrap();
        h.upstream.set_changes(vec![marquee_upstream::Change {
            kind: EntityKind::Movie,
            id: 3,
            deleted: true,
        }]);

        let job_id = h.engine.enqueue(SyncJobKind::Incremental, None).await.unwrap();
        let stats = h.engine.run(job_id).await.unwrap();

        assert_eq!(stats.soft_deleted, 1);
        assert!(h.store.get_entry("movie", 3).await.unwrap().is_none());
        // Row survives as a tombstone.
        assert!(h.store.get_entry_any("movie", 3).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_targeted_series_pulls_episodes() {
        let h = harness(FakeUpstream::new()).await;
        h.upstream
            .insert_entity(EntityKind::Series, 42, json!({"id": 42, "name": "Show"}));
        h.upstream.insert_episode_page(
            42,
            0,
            vec![json!({"id": 100}), json!({"id": 101})],
            Some(1),
        );
        h.upstream
            .insert_episode_page(42, 1, vec![json!({"id": 102})], None);

        let target = EntityKey::new(EntityKind::Series, 42);
        let job_id = h
            .engine
            .enqueue(SyncJobKind::Targeted, Some(target))
            .await
            .unwrap();
        let stats = h.engine.run(job_id).await.unwrap();

        assert_eq!(stats.updated, 4);
        assert!(h.store.get_entry("series", 42).await.unwrap().is_some());
        for id in [100, 101, 102] {
            assert!(h.store.get_entry("episode", id).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn test_targeted_jobs_are_not_mutually_exclusive() {
        let h = harness(FakeUpstream::new()).await;
        h.upstream
            .insert_entity(EntityKind::Series, 1, json!({"id": 1}));
        h.upstream
            .insert_entity(EntityKind::Series, 2, json!({"id": 2}));

        let a = EntityKey::new(EntityKind::Series, 1);
        let b = EntityKey::new(EntityKind::Series, 2);
        h.engine.enqueue(SyncJobKind::Targeted, Some(a)).await.unwrap();
        h.engine.enqueue(SyncJobKind::Targeted, Some(b)).await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_clears_candidate_when_upstream_has_it() {
        let h = harness(FakeUpstream::new()).await;
        let now = OffsetDateTime::now_utc();
        h.store
            .upsert_entry(&CacheEntryRow {
                entity_kind: "series".to_string(),
                entity_id: 4,
                payload: json!({"id": 4}).to_string(),
                data_class: "dynamic".to_string(),
                refreshed_at: now,
                delete_candidate_at: None,
                deleted_at: None,
                created_at: now,
            })
            .await
            .unwrap();
        h.store
            .mark_delete_candidate("series", 4, now)
            .await
            .unwrap();
        h.upstream
            .insert_entity(EntityKind::Series, 4, json!({"id": 4}));

        let job_id = h.engine.enqueue(SyncJobKind::Cleanup, None).await.unwrap();
        let stats = h.engine.run(job_id).await.unwrap();

        assert_eq!(stats.soft_deleted, 0);
        assert!(h.store.list_delete_candidates().await.unwrap().is_empty());
        assert!(h.store.get_entry("series", 4).await.unwrap().is_some());
        assert_eq!(stats.updated, 1);
    }

    #[tokio::test]
    async fn test_cleanup_soft_deletes_confirmed_absence() {
        let h = harness(FakeUpstream::new()).await;
        let now = OffsetDateTime::now_utc();
        h.store
            .upsert_entry(&CacheEntryRow {
                entity_kind: "series".to_string(),
                entity_id: 4,
                payload: json!({"id": 4}).to_string(),
                data_class: "dynamic".to_string(),
                refreshed_at: now,
                delete_candidate_at: None,
                deleted_at: None,
                created_at: now,
            })
            .await
            .unwrap();
        h.store
            .mark_delete_candidate("series", 4, now)
            .await
            .unwrap();
        // Upstream has no record for id 4, the fetch 404s.

        let job_id = h.engine.enqueue(SyncJobKind::Cleanup, None).await.unwrap();
        let stats = h.engine.run(job_id).await.unwrap();

        assert_eq!(stats.soft_deleted, 1);
        assert!(h.store.get_entry("series", 4).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cleanup_keeps_candidate_on_transient_failure() {
        let h = harness(FakeUpstream::new()).await;
        let now = OffsetDateTime::now_utc();
        h.store
            .upsert_entry(&CacheEntryRow {
                entity_kind: "series".to_string(),
                entity_id: 4,
                payload: json!({"id": 4}).to_string(),
                data_class: "dynamic".to_string(),
                refreshed_at: now,
                delete_candidate_at: None,
                deleted_at: None,
                created_at: now,
            })
            .await
            .unwrap();
        h.store
            .mark_delete_candidate("series", 4, now)
            .await
            .unwrap();

        // Swap in an unavailable upstream for the cleanup run.
        let h2 = {
            let upstream = Arc::new(FakeUpstream::unavailable());
            let (refresh_tx, _rx) = mpsc::unbounded_channel();
            let cache = Arc::new(TieredCache::new(
                h.store.clone(),
                upstream.clone(),
                CacheConfig::default(),
                refresh_tx,
            ));
            let artifacts = Arc::new(ArtifactPipeline::new(
                h.store.clone(),
                Arc::new(FailingStore::failing_after(usize::MAX)),
                upstream.clone(),
                ArtifactConfig::default(),
            ));
            SyncEngine::new(
                h.store.clone(),
                upstream,
                cache,
                artifacts,
                SyncConfig::default(),
            )
        };

        let job_id = h2.enqueue(SyncJobKind::Cleanup, None).await.unwrap();
        let stats = h2.run(job_id).await.unwrap();

        // Failed re-verification deletes nothing and records partial outcome.
        assert_eq!(stats.soft_deleted, 0);
        assert_eq!(stats.failed, 1);
        assert_eq!(
            h.store.list_delete_candidates().await.unwrap(),
            vec![("series".to_string(), 4)]
        );
        let job = h.store.get_sync_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.state, "partial");
    }

    #[tokio::test]
    async fn test_tombstones_purged_only_after_retention() {
        let h = harness(FakeUpstream::new()).await;
        let now = OffsetDateTime::now_utc();
        for (id, deleted_at) in [
            (1, now - time::Duration::days(40)),
            (2, now - time::Duration::days(5)),
        ] {
            h.store
                .upsert_entry(&CacheEntryRow {
                    entity_kind: "series".to_string(),
                    entity_id: id,
                    payload: json!({"id": id}).to_string(),
                    data_class: "dynamic".to_string(),
                    refreshed_at: now,
                    delete_candidate_at: None,
                    deleted_at: None,
                    created_at: now,
                })
                .await
                .unwrap();
            h.store
                .soft_delete_entry("series", id, deleted_at)
                .await
                .unwrap();
        }

        let job_id = h.engine.enqueue(SyncJobKind::Cleanup, None).await.unwrap();
        let stats = h.engine.run(job_id).await.unwrap();

        // Only the entry past the 30-day retention window is hard-deleted.
        assert_eq!(stats.purged, 1);
        assert!(h.store.get_entry_any("series", 1).await.unwrap().is_none());
        assert!(h.store.get_entry_any("series", 2).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_repeated_batch_failures_abort_the_job() {
        let h = harness(FakeUpstream::unavailable()).await;

        let job_id = h.engine.enqueue(SyncJobKind::Full, None).await.unwrap();
        let err = h.engine.run(job_id).await.unwrap_err();
        assert!(matches!(err, SyncError::Aborted(_)));

        let job = h.store.get_sync_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.state, "failed");
        assert!(job.error.is_some());
    }

    #[tokio::test]
    async fn test_sync_upsert_refreshes_hot_tier() {
        let h = harness(FakeUpstream::new()).await;
        let key = EntityKey::new(EntityKind::Series, 42);
        h.upstream
            .insert_entity(EntityKind::Series, 42, json!({"id": 42, "name": "v1"}));

        let first = h.cache.resolve(key).await.unwrap();
        assert_eq!(first.payload["name"], "v1");

        h.upstream
            .insert_entity(EntityKind::Series, 42, json!({"id": 42, "name": "v2"}));
        let mut stats = SyncStats::default();
        h.engine.run_targeted(key, &mut stats).await.unwrap();

        let second = h.cache.resolve(key).await.unwrap();
        assert_eq!(second.payload["name"], "v2");
    }
}
