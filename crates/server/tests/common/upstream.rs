//! In-memory fake upstream for server tests.

use async_trait::async_trait;
use bytes::Bytes;
use marquee_core::EntityKind;
use marquee_upstream::client::{Change, ChangePage, Page};
use marquee_upstream::{UpstreamClient, UpstreamError, UpstreamResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use time::OffsetDateTime;

/// Fake upstream backed by an in-memory entity map.
///
/// Flip `unavailable` to simulate an outage; every call then fails with
/// `Unavailable`. `fetch_count` records how many single-entity fetches the
/// code under test issued.
#[allow(dead_code)]
#[derive(Default)]
pub struct FakeUpstream {
    entities: Mutex<HashMap<(EntityKind, i64), Value>>,
    pub unavailable: AtomicBool,
    pub fetch_count: AtomicU32,
}

#[allow(dead_code)]
impl FakeUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, kind: EntityKind, id: i64, payload: Value) {
        self.entities.lock().unwrap().insert((kind, id), payload);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> UpstreamResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(UpstreamError::Unavailable("fake outage".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl UpstreamClient for FakeUpstream {
    async fn fetch(&self, kind: EntityKind, id: i64) -> UpstreamResult<Value> {
        self.check_available()?;
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        self.entities
            .lock()
            .unwrap()
            .get(&(kind, id))
            .cloned()
            .ok_or(UpstreamError::NotFound)
    }

    async fn fetch_page(&self, kind: EntityKind, _page: u32) -> UpstreamResult<Page> {
        self.check_available()?;
        let items = self
            .entities
            .lock()
            .unwrap()
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, v)| v.clone())
            .collect();
        Ok(Page {
            items,
            next_page: None,
        })
    }

    async fn fetch_series_episodes(&self, _series_id: i64, _page: u32) -> UpstreamResult<Page> {
        self.check_available()?;
        Ok(Page {
            items: Vec::new(),
            next_page: None,
        })
    }

    async fn changes_since(
        &self,
        _since: OffsetDateTime,
        _page: u32,
    ) -> UpstreamResult<ChangePage> {
        self.check_available()?;
        Ok(ChangePage {
            changes: Vec::<Change>::new(),
            next_page: None,
        })
    }

    async fn download(&self, _url: &str) -> UpstreamResult<(Bytes, Option<String>)> {
        self.check_available()?;
        Err(UpstreamError::NotFound)
    }
}
