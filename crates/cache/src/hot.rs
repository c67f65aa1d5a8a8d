//! In-process hot tier.
//!
//! A bounded map of recently resolved entities plus negative entries for
//! confirmed upstream 404s. Expired entries are dropped lazily on read and
//! in bulk by the periodic sweep.

use dashmap::DashMap;
use marquee_core::{CachedEntity, EntityKey, EntityKind};
use time::OffsetDateTime;
use tracing::debug;

/// A hot-tier slot: either a cached payload or a negative marker.
#[derive(Debug, Clone)]
pub enum HotValue {
    Present(CachedEntity),
    Negative,
}

#[derive(Debug, Clone)]
struct HotEntry {
    value: HotValue,
    expires_at: OffsetDateTime,
}

/// Bounded in-memory cache tier.
pub struct HotTier {
    entries: DashMap<EntityKey, HotEntry>,
    max_entries: usize,
}

impl HotTier {
    pub fn new(max_entries: u32) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries as usize,
        }
    }

    /// Look up a key, dropping the slot if it has expired.
    pub fn get(&self, key: &EntityKey, now: OffsetDateTime) -> Option<HotValue> {
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Some(entry.value.clone());
            }
            drop(entry);
            self.entries.remove(key);
        }
        None
    }

    /// Insert a resolved entity with the given TTL.
    ///
    /// When the tier is at capacity the insert is skipped; the durable tier
    /// still holds the entry, so correctness is unaffected.
    pub fn insert(&self, key: EntityKey, value: HotValue, ttl_secs: u64, now: OffsetDateTime) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            debug!(%key, "hot tier at capacity, skipping insert");
            return;
        }
        self.entries.insert(
            key,
            HotEntry {
                value,
                expires_at: now + time::Duration::seconds(ttl_secs.min(i64::MAX as u64) as i64),
            },
        );
    }

    /// Drop a single key.
    pub fn invalidate(&self, key: &EntityKey) {
        self.entries.remove(key);
    }

    /// Drop every key of the given kind.
    pub fn invalidate_kind(&self, kind: EntityKind) {
        self.entries.retain(|key, _| key.kind != kind);
    }

    /// Remove all expired entries. Returns the number removed.
    pub fn sweep(&self, now: OffsetDateTime) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marquee_core::DataClass;
    use serde_json::json;

    fn entity(kind: EntityKind, id: i64) -> CachedEntity {
        CachedEntity {
            key: EntityKey::new(kind, id),
            payload: json!({"id": id}),
            data_class: DataClass::Dynamic,
            refreshed_at: OffsetDateTime::now_utc(),
            stale: false,
        }
    }

    #[test]
    fn test_expired_entry_dropped_on_read() {
        let tier = HotTier::new(10);
        let now = OffsetDateTime::now_utc();
        let key = EntityKey::new(EntityKind::Series, 1);

        tier.insert(key, HotValue::Present(entity(EntityKind::Series, 1)), 60, now);
        assert!(tier.get(&key, now).is_some());
        assert!(tier.get(&key, now + time::Duration::seconds(61)).is_none());
        assert!(tier.is_empty());
    }

    #[test]
    fn test_capacity_skips_new_inserts_but_allows_overwrites() {
        let tier = HotTier::new(2);
        let now = OffsetDateTime::now_utc();
        for id in 0..2 {
            tier.insert(
                EntityKey::new(EntityKind::Movie, id),
                HotValue::Present(entity(EntityKind::Movie, id)),
                60,
                now,
            );
        }

        tier.insert(
            EntityKey::new(EntityKind::Movie, 99),
            HotValue::Negative,
            60,
            now,
        );
        assert!(tier.get(&EntityKey::new(EntityKind::Movie, 99), now).is_none());

        // Overwriting an existing key is always allowed.
        tier.insert(
            EntityKey::new(EntityKind::Movie, 0),
            HotValue::Negative,
            60,
            now,
        );
        assert!(matches!(
            tier.get(&EntityKey::new(EntityKind::Movie, 0), now),
            Some(HotValue::Negative)
        ));
    }

    #[test]
    fn test_sweep_and_invalidate_kind() {
        let tier = HotTier::new(10);
        let now = OffsetDateTime::now_utc();

        tier.insert(
            EntityKey::new(EntityKind::Series, 1),
            HotValue::Present(entity(EntityKind::Series, 1)),
            10,
            now,
        );
        tier.insert(
            EntityKey::new(EntityKind::Movie, 2),
            HotValue::Present(entity(EntityKind::Movie, 2)),
            120,
            now,
        );

        assert_eq!(tier.sweep(now + time::Duration::seconds(30)), 1);
        assert_eq!(tier.len(), 1);

        tier.invalidate_kind(EntityKind::Movie);
        assert!(tier.is_empty());
    }
}
