//! Shared fakes for sync and pipeline tests.

use async_trait::async_trait;
use bytes::Bytes;
use marquee_core::EntityKind;
use marquee_storage::traits::{ObjectMeta, ObjectStore};
use marquee_storage::{StorageError, StorageResult};
use marquee_upstream::client::{Change, ChangePage, Page, UpstreamClient};
use marquee_upstream::{UpstreamError, UpstreamResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use time::OffsetDateTime;

/// Scriptable in-memory upstream.
#[derive(Default)]
pub struct FakeUpstream {
    pub fetches: AtomicUsize,
    pub entities: Mutex<HashMap<(EntityKind, i64), Value>>,
    pub pages: Mutex<HashMap<(EntityKind, u32), Page>>,
    pub episode_pages: Mutex<HashMap<(i64, u32), Page>>,
    pub changes: Mutex<Vec<Change>>,
    pub image: Option<(Bytes, Option<String>)>,
    /// When set, every call fails with `Unavailable`.
    pub down: bool,
}

impl FakeUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable() -> Self {
        Self {
            down: true,
            ..Self::default()
        }
    }

    pub fn serving_image(bytes: Bytes, content_type: Option<String>) -> Self {
        Self {
            image: Some((bytes, content_type)),
            ..Self::default()
        }
    }

    pub fn insert_entity(&self, kind: EntityKind, id: i64, payload: Value) {
        self.entities.lock().unwrap().insert((kind, id), payload);
    }

    pub fn remove_entity(&self, kind: EntityKind, id: i64) {
        self.entities.lock().unwrap().remove(&(kind, id));
    }

    pub fn insert_page(&self, kind: EntityKind, page: u32, items: Vec<Value>, next: Option<u32>) {
        self.pages.lock().unwrap().insert(
            (kind, page),
            Page {
                items,
                next_page: next,
            },
        );
    }

    pub fn insert_episode_page(
        &self,
        series_id: i64,
        page: u32,
        items: Vec<Value>,
        next: Option<u32>,
    ) {
        self.episode_pages.lock().unwrap().insert(
            (series_id, page),
            Page {
                items,
                next_page: next,
            },
        );
    }

    pub fn set_changes(&self, changes: Vec<Change>) {
        *self.changes.lock().unwrap() = changes;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn check_down<T>(&self) -> Option<UpstreamResult<T>> {
        if self.down {
            Some(Err(UpstreamError::Unavailable("fake upstream down".into())))
        } else {
            None
        }
    }
}

#[async_trait]
impl UpstreamClient for FakeUpstream {
    async fn fetch(&self, kind: EntityKind, id: i64) -> UpstreamResult<Value> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.check_down() {
            return err;
        }
        self.entities
            .lock()
            .unwrap()
            .get(&(kind, id))
            .cloned()
            .ok_or(UpstreamError::NotFound)
    }

    async fn fetch_page(&self, kind: EntityKind, page: u32) -> UpstreamResult<Page> {
        if let Some(err) = self.check_down() {
            return err;
        }
        Ok(self
            .pages
            .lock()
            .unwrap()
            .get(&(kind, page))
            .cloned()
            .unwrap_or(Page {
                items: Vec::new(),
                next_page: None,
            }))
    }

    async fn fetch_series_episodes(&self, series_id: i64, page: u32) -> UpstreamResult<Page> {
        if let Some(err) = self.check_down() {
            return err;
        }
        Ok(self
            .episode_pages
            .lock()
            .unwrap()
            .get(&(series_id, page))
            .cloned()
            .unwrap_or(Page {
                items: Vec::new(),
                next_page: None,
            }))
    }

    async fn changes_since(
        &self,
        _since: OffsetDateTime,
        page: u32,
    ) -> UpstreamResult<ChangePage> {
        if let Some(err) = self.check_down() {
            return err;
        }
        let changes = if page == 0 {
            self.changes.lock().unwrap().clone()
        } else {
            Vec::new()
        };
        Ok(ChangePage {
            changes,
            next_page: None,
        })
    }

    async fn download(&self, _url: &str) -> UpstreamResult<(Bytes, Option<String>)> {
        if let Some(err) = self.check_down() {
            return err;
        }
        self.image.clone().ok_or(UpstreamError::NotFound)
    }
}

/// In-memory object store whose puts start failing after a threshold.
pub struct FailingStore {
    objects: Mutex<HashMap<String, Bytes>>,
    puts: AtomicUsize,
    fail_after: usize,
}

impl FailingStore {
    pub fn failing_after(successful_puts: usize) -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            puts: AtomicUsize::new(0),
            fail_after: successful_puts,
        }
    }

    pub fn stored_keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStore for FailingStore {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let objects = self.objects.lock().unwrap();
        let data = objects
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(ObjectMeta {
            size: data.len() as u64,
            last_modified: None,
            content_type: None,
        })
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> StorageResult<()> {
        if self.puts.fetch_add(1, Ordering::SeqCst) >= self.fail_after {
            return Err(StorageError::Backend("injected put failure".to_string()));
        }
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.objects
            .lock()
            .unwrap()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn backend_name(&self) -> &'static str {
        "fake"
    }

    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}
