//! Per-key single-flight coordination.
//!
//! Concurrent misses on the same key serialize behind one async mutex; the
//! leader performs the upstream fetch and followers re-check the cache tiers
//! once the lock is released.

use dashmap::DashMap;
use marquee_core::EntityKey;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct FlightGroup {
    locks: DashMap<EntityKey, Arc<Mutex<()>>>,
}

impl FlightGroup {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Get the flight lock for a key, creating it if absent.
    pub fn lock_for(&self, key: EntityKey) -> Arc<Mutex<()>> {
        self.locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock entry once no other task holds a handle to it.
    ///
    /// The caller's own clone counts as one reference alongside the map's,
    /// so a count of two means no followers are waiting.
    pub fn release(&self, key: &EntityKey, handle: Arc<Mutex<()>>) {
        drop(handle);
        self.locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) <= 1);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.locks.len()
    }
}

impl Default for FlightGroup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marquee_core::EntityKind;

    #[tokio::test]
    async fn test_lock_released_when_last_holder_done() {
        let group = FlightGroup::new();
        let key = EntityKey::new(EntityKind::Series, 1);

        let handle = group.lock_for(key);
        {
            let _guard = handle.lock().await;
        }
        assert_eq!(group.len(), 1);

        group.release(&key, handle);
        assert_eq!(group.len(), 0);
    }

    #[tokio::test]
    async fn test_lock_retained_while_follower_waits() {
        let group = FlightGroup::new();
        let key = EntityKey::new(EntityKind::Series, 1);

        let leader = group.lock_for(key);
        let follower = group.lock_for(key);

        group.release(&key, leader);
        // Follower still holds a handle, so the entry stays.
        assert_eq!(group.len(), 1);

        group.release(&key, follower);
        assert_eq!(group.len(), 0);
    }
}
