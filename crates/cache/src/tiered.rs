//! Two-tier read-through cache.
//!
//! Resolve order: hot tier, durable tier, upstream. Writes go durable-first
//! so a crash after an upstream fetch never loses the payload; the hot tier
//! is repopulated on the next read at worst.

use crate::error::{CacheError, CacheResult};
use crate::flight::FlightGroup;
use crate::hot::{HotTier, HotValue};
use marquee_core::config::CacheConfig;
use marquee_core::{CachedEntity, DataClass, EntityKey, EntityKind};
use marquee_metadata::MetadataStore;
use marquee_metadata::models::CacheEntryRow;
use marquee_upstream::{UpstreamClient, UpstreamError};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

pub struct TieredCache {
    hot: HotTier,
    store: Arc<dyn MetadataStore>,
    upstream: Arc<dyn UpstreamClient>,
    flight: FlightGroup,
    /// Keys served stale are pushed here for the background refresh worker.
    refresh_tx: mpsc::UnboundedSender<EntityKey>,
    config: CacheConfig,
}

impl TieredCache {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        upstream: Arc<dyn UpstreamClient>,
        config: CacheConfig,
        refresh_tx: mpsc::UnboundedSender<EntityKey>,
    ) -> Self {
        Self {
            hot: HotTier::new(config.hot_max_entries),
            store,
            upstream,
            flight: FlightGroup::new(),
            refresh_tx,
            config,
        }
    }

    fn ttl_for(&self, data_class: DataClass) -> u64 {
        match data_class {
            DataClass::Static => self.config.static_ttl_secs,
            DataClass::Dynamic => self.config.dynamic_ttl_secs,
        }
    }

    fn is_fresh(&self, entity: &CachedEntity, now: OffsetDateTime) -> bool {
        let age = now - entity.refreshed_at;
        age.whole_seconds() >= 0
            && (age.whole_seconds() as u64) < self.ttl_for(entity.data_class)
    }

    /// Resolve an entity, fetching from the upstream on a miss.
    ///
    /// Concurrent misses on the same key collapse into a single upstream
    /// fetch. A fresh payload that cannot be refreshed because the upstream
    /// is unreachable is served stale and queued for background refresh.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn resolve(&self, key: EntityKey) -> CacheResult<CachedEntity> {
        let now = OffsetDateTime::now_utc();

        if let Some(result) = self.check_hot(&key, now) {
            return result;
        }

        let mut stale = None;
        if let Some(entity) = self.load_durable(&key).await? {
            if self.is_fresh(&entity, now) {
                self.promote(&entity, now);
                return Ok(entity);
            }
            stale = Some(entity);
        }

        // Cold or expired: serialize fetches for this key.
        let lock = self.flight.lock_for(key);
        let result = {
            let _guard = lock.lock().await;
            let now = OffsetDateTime::now_utc();

            // A concurrent leader may already have filled either tier.
            if let Some(result) = self.check_hot(&key, now) {
                result
            } else {
                match self.load_durable(&key).await? {
                    Some(entity) if self.is_fresh(&entity, now) => {
                        self.promote(&entity, now);
                        Ok(entity)
                    }
                    refreshed => {
                        let stale = refreshed.or(stale);
                        self.fetch_and_commit(key, stale, now).await
                    }
                }
            }
        };
        self.flight.release(&key, lock);
        result
    }

    fn check_hot(&self, key: &EntityKey, now: OffsetDateTime) -> Option<CacheResult<CachedEntity>> {
        match self.hot.get(key, now)? {
            HotValue::Present(entity) => Some(Ok(entity)),
            HotValue::Negative => Some(Err(CacheError::NotFound(key.to_string()))),
        }
    }

    async fn load_durable(&self, key: &EntityKey) -> CacheResult<Option<CachedEntity>> {
        let Some(row) = self
            .store
            .get_entry(key.kind.as_str(), key.id)
            .await?
        else {
            return Ok(None);
        };
        Ok(Some(entity_from_row(*key, row)?))
    }

    fn promote(&self, entity: &CachedEntity, now: OffsetDateTime) {
        // Remaining TTL, not the full one, so the hot copy expires together
        // with the durable freshness window.
        let age = (now - entity.refreshed_at).whole_seconds().max(0) as u64;
        let remaining = self.ttl_for(entity.data_class).saturating_sub(age);
        if remaining > 0 {
            self.hot.insert(
                entity.key,
                HotValue::Present(entity.clone()),
                remaining,
                now,
            );
        }
    }

    async fn fetch_and_commit(
        &self,
        key: EntityKey,
        stale: Option<CachedEntity>,
        now: OffsetDateTime,
    ) -> CacheResult<CachedEntity> {
        match self.upstream.fetch(key.kind, key.id).await {
            Ok(payload) => {
                let entity = CachedEntity {
                    key,
                    payload,
                    data_class: key.kind.data_class(),
                    refreshed_at: now,
                    stale: false,
                };
                self.store.upsert_entry(&row_from_entity(&entity, now)).await?;
                self.hot.insert(
                    key,
                    HotValue::Present(entity.clone()),
                    self.ttl_for(entity.data_class),
                    now,
                );
                Ok(entity)
            }
            Err(UpstreamError::NotFound) => {
                debug!(%key, "upstream 404, caching negative entry");
                self.hot
                    .insert(key, HotValue::Negative, self.config.negative_ttl_secs, now);
                Err(CacheError::NotFound(key.to_string()))
            }
            Err(err) if err.is_retryable() => match stale {
                Some(mut entity) => {
                    warn!(%key, error = %err, "upstream unreachable, serving stale");
                    entity.stale = true;
                    if self.refresh_tx.send(key).is_err() {
                        warn!(%key, "refresh queue closed, stale entry will retry on next read");
                    }
                    Ok(entity)
                }
                None => Err(err.into()),
            },
            Err(err) => Err(err.into()),
        }
    }

    /// Sync-engine write path: commit a payload durable-first, then refresh
    /// the hot tier so readers see the new payload without another store hit.
    pub async fn upsert(&self, key: EntityKey, payload: serde_json::Value) -> CacheResult<()> {
        let now = OffsetDateTime::now_utc();
        let entity = CachedEntity {
            key,
            payload,
            data_class: key.kind.data_class(),
            refreshed_at: now,
            stale: false,
        };
        self.store.upsert_entry(&row_from_entity(&entity, now)).await?;
        self.hot.insert(
            key,
            HotValue::Present(entity),
            self.ttl_for(key.kind.data_class()),
            now,
        );
        Ok(())
    }

    /// Drop a key from the hot tier.
    ///
    /// Called by the sync engine after it tombstones the durable row, so the
    /// next read observes the new state.
    pub fn invalidate(&self, key: &EntityKey) {
        self.hot.invalidate(key);
    }

    /// Drop every hot entry of a kind.
    pub fn invalidate_kind(&self, kind: EntityKind) {
        self.hot.invalidate_kind(kind);
    }

    pub fn hot_len(&self) -> usize {
        self.hot.len()
    }

    /// Spawn the periodic hot-tier expiry sweep.
    pub fn start_sweeper(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval_secs = self.config.cleanup_interval_secs.max(1);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let removed = self.hot.sweep(OffsetDateTime::now_utc());
                if removed > 0 {
                    debug!(removed, remaining = self.hot.len(), "hot tier sweep");
                }
            }
        })
    }
}

fn entity_from_row(key: EntityKey, row: CacheEntryRow) -> CacheResult<CachedEntity> {
    let payload = serde_json::from_str(&row.payload)
        .map_err(|e| CacheError::Corrupt(format!("{key}: {e}")))?;
    let data_class = DataClass::parse(&row.data_class)
        .map_err(|e| CacheError::Corrupt(format!("{key}: {e}")))?;
    Ok(CachedEntity {
        key,
        payload,
        data_class,
        refreshed_at: row.refreshed_at,
        stale: false,
    })
}

fn row_from_entity(entity: &CachedEntity, now: OffsetDateTime) -> CacheEntryRow {
    CacheEntryRow {
        entity_kind: entity.key.kind.as_str().to_string(),
        entity_id: entity.key.id,
        payload: entity.payload.to_string(),
        data_class: entity.data_class.as_str().to_string(),
        refreshed_at: entity.refreshed_at,
        delete_candidate_at: None,
        deleted_at: None,
        created_at: now,
    }
}
