//! Background job scheduling.
//!
//! Owns the periodic incremental and cleanup triggers, the targeted-refresh
//! queue worker, and startup recovery of jobs a previous process left
//! behind.

use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use marquee_core::EntityKey;
use marquee_core::config::SyncConfig;
use marquee_metadata::MetadataStore;
use marquee_metadata::repos::{SyncJobKind, SyncJobState};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Minimum spacing between targeted refreshes of the same key.
const REFRESH_DEDUP_WINDOW: Duration = Duration::from_secs(60);

/// Mark jobs left queued or running by a crashed process as failed.
///
/// Called once at startup before the scheduler spawns anything; their tasks
/// no longer exist, so the rows would otherwise block the job mutex forever.
pub async fn recover_orphaned_jobs(store: &Arc<dyn MetadataStore>) -> SyncResult<u32> {
    let orphans = store.get_orphaned_sync_jobs().await?;
    let mut recovered = 0;
    for job in orphans {
        warn!(
            job_id = %job.job_id,
            kind = job.job_kind,
            state = job.state,
            "marking orphaned sync job as failed"
        );
        store
            .update_sync_job_state(
                job.job_id,
                SyncJobState::Failed.as_str(),
                None,
                Some(OffsetDateTime::now_utc()),
                None,
                Some("orphaned by process restart"),
            )
            .await?;
        recovered += 1;
    }
    if recovered > 0 {
        info!(recovered, "recovered orphaned sync jobs");
    }
    Ok(recovered)
}

/// Spawn a job run in its own task, with a monitor that records a failed
/// state if the task panics instead of finishing.
pub fn spawn_job(engine: Arc<SyncEngine>, store: Arc<dyn MetadataStore>, job_id: Uuid) {
    let handle = tokio::spawn({
        let engine = engine.clone();
        async move {
            if let Err(err) = engine.run(job_id).await {
                debug!(%job_id, error = %err, "sync job ended with error");
            }
        }
    });

    tokio::spawn(async move {
        if handle.await.is_err() {
            warn!(%job_id, "sync job task panicked");
            if let Err(err) = store
                .update_sync_job_state(
                    job_id,
                    SyncJobState::Failed.as_str(),
                    None,
                    Some(OffsetDateTime::now_utc()),
                    None,
                    Some("job task panicked"),
                )
                .await
            {
                warn!(%job_id, error = %err, "failed to record panicked job");
            }
        }
    });
}

/// Start the periodic triggers and the refresh-queue worker.
pub fn start(
    engine: Arc<SyncEngine>,
    store: Arc<dyn MetadataStore>,
    config: &SyncConfig,
    refresh_rx: mpsc::UnboundedReceiver<EntityKey>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();

    handles.push(spawn_periodic(
        engine.clone(),
        store.clone(),
        SyncJobKind::Incremental,
        config.incremental_interval(),
    ));
    handles.push(spawn_periodic(
        engine.clone(),
        store.clone(),
        SyncJobKind::Cleanup,
        config.cleanup_interval(),
    ));
    handles.push(spawn_refresh_worker(engine, refresh_rx));

    handles
}

fn spawn_periodic(
    engine: Arc<SyncEngine>,
    store: Arc<dyn MetadataStore>,
    kind: SyncJobKind,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The immediate first tick would fire a job at startup; skip it.
        interval.tick().await;
        loop {
            interval.tick().await;
            match engine.enqueue(kind, None).await {
                Ok(job_id) => {
                    debug!(kind = kind.as_str(), %job_id, "scheduled periodic job");
                    spawn_job(engine.clone(), store.clone(), job_id);
                }
                Err(SyncError::Conflict(_)) => {
                    debug!(kind = kind.as_str(), "previous job still active, skipping tick");
                }
                Err(err) => {
                    warn!(kind = kind.as_str(), error = %err, "failed to schedule job");
                }
            }
        }
    })
}

/// Drain the targeted-refresh queue fed by stale-serving cache reads.
///
/// Keys repeating within the dedup window are dropped; one stale burst on a
/// hot key yields one refresh.
fn spawn_refresh_worker(
    engine: Arc<SyncEngine>,
    mut refresh_rx: mpsc::UnboundedReceiver<EntityKey>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut recent: HashMap<EntityKey, tokio::time::Instant> = HashMap::new();
        while let Some(key) = refresh_rx.recv().await {
            let now = tokio::time::Instant::now();
            recent.retain(|_, at| now.duration_since(*at) < REFRESH_DEDUP_WINDOW);
            if recent.contains_key(&key) {
                continue;
            }
            recent.insert(key, now);

            let mut stats = Default::default();
            match engine.run_targeted(key, &mut stats).await {
                Ok(()) => debug!(%key, "background refresh completed"),
                Err(err) => warn!(%key, error = %err, "background refresh failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use marquee_metadata::SqliteStore;
    use marquee_metadata::models::SyncJobRow;

    #[tokio::test]
    async fn test_recover_marks_queued_and_running_jobs_failed() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&dir.path().join("scheduler-test.db"))
                .await
                .unwrap(),
        );

        let now = OffsetDateTime::now_utc();
        for (kind, state) in [("full", "queued"), ("incremental", "running")] {
            store
                .create_sync_job(&SyncJobRow {
                    job_id: Uuid::new_v4(),
                    job_kind: kind.to_string(),
                    state: state.to_string(),
                    target_kind: None,
                    target_id: None,
                    created_at: now,
                    started_at: None,
                    finished_at: None,
                    stats: None,
                    error: None,
                })
                .await
                .unwrap();
        }

        assert_eq!(recover_orphaned_jobs(&store).await.unwrap(), 2);

        for job in store.get_recent_sync_jobs(10).await.unwrap() {
            assert_eq!(job.state, "failed");
            assert_eq!(job.error.as_deref(), Some("orphaned by process restart"));
        }
        assert!(store.get_orphaned_sync_jobs().await.unwrap().is_empty());
    }
}
