//! Server test harness.

use super::upstream::FakeUpstream;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use marquee_cache::TieredCache;
use marquee_core::config::{AppConfig, MetadataConfig, StorageConfig};
use marquee_metadata::{MetadataStore, SqliteStore};
use marquee_server::bootstrap::ensure_admin_credential;
use marquee_server::{AppState, create_router};
use marquee_storage::{FilesystemBackend, ObjectStore};
use marquee_sync::{ArtifactPipeline, SyncEngine};
use marquee_upstream::UpstreamClient;
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;

/// A test server wired to a fake upstream and temporary storage.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub upstream: Arc<FakeUpstream>,
    _refresh_rx: mpsc::UnboundedReceiver<marquee_core::EntityKey>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server, letting the caller tweak the config first.
    pub async fn with_config(modifier: impl FnOnce(&mut AppConfig)) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let storage_path = temp_dir.path().join("storage");
        std::fs::create_dir_all(&storage_path).expect("Failed to create storage directory");
        let objects: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(&storage_path)
                .await
                .expect("Failed to create storage backend"),
        );

        let db_path = temp_dir.path().join("metadata.db");
        let store: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path)
                .await
                .expect("Failed to create metadata store"),
        );

        let mut config = AppConfig::for_testing();
        config.metadata = MetadataConfig::Sqlite { path: db_path };
        config.storage = StorageConfig::Filesystem {
            path: storage_path,
            public_base_url: Some("http://assets.test".to_string()),
        };
        modifier(&mut config);

        ensure_admin_credential(store.as_ref(), &config.admin)
            .await
            .expect("Failed to bootstrap admin credential");

        let upstream = Arc::new(FakeUpstream::new());
        let upstream_dyn: Arc<dyn UpstreamClient> = upstream.clone();

        // Receiver is held by the harness; no refresh worker runs in tests.
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();

        let cache = Arc::new(TieredCache::new(
            store.clone(),
            upstream_dyn.clone(),
            config.cache.clone(),
            refresh_tx,
        ));
        let artifacts = Arc::new(ArtifactPipeline::new(
            store.clone(),
            objects.clone(),
            upstream_dyn.clone(),
            config.artifacts.clone(),
        ));
        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            upstream_dyn,
            cache.clone(),
            artifacts.clone(),
            config.sync.clone(),
        ));

        let state = AppState::new(config, store, objects, cache, engine, artifacts);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            upstream,
            _refresh_rx: refresh_rx,
            _temp_dir: temp_dir,
        }
    }

    pub fn store(&self) -> Arc<dyn MetadataStore> {
        self.state.store.clone()
    }

    /// Log in as the bootstrap admin and return the session token.
    pub async fn admin_token(&self) -> String {
        let (status, body) = self
            .request(
                "POST",
                "/api/v1/auth/login",
                Some(json!({
                    "key_id": "mq_k_admin",
                    "secret": "test-admin-secret",
                })),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK, "admin login failed: {body}");
        body["token"].as_str().expect("token missing").to_string()
    }

    /// Create a non-admin credential through the admin API and log it in.
    /// Returns (credential_id, session_token).
    pub async fn member_token(&self, admin_token: &str) -> (String, String) {
        let (status, body) = self
            .request(
                "POST",
                "/api/v1/admin/credentials",
                Some(json!({ "name": "test member" })),
                Some(admin_token),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "credential create failed: {body}");
        let key_id = body["key_id"].as_str().expect("key_id missing");
        let secret = body["secret"].as_str().expect("secret missing");
        let credential_id = body["credential_id"]
            .as_str()
            .expect("credential_id missing")
            .to_string();

        let (status, body) = self
            .request(
                "POST",
                "/api/v1/auth/login",
                Some(json!({ "key_id": key_id, "secret": secret })),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK, "member login failed: {body}");
        let token = body["token"].as_str().expect("token missing").to_string();
        (credential_id, token)
    }

    /// Issue a JSON request against the router and decode the response body.
    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
        auth_token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(token) = auth_token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }

        let body = match body {
            Some(v) => {
                builder = builder.header("Content-Type", "application/json");
                Body::from(serde_json::to_vec(&v).unwrap())
            }
            None => Body::empty(),
        };

        let request = builder.body(body).unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();

        let status = response.status();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        (status, json)
    }

    /// Like [`request`] but returns the raw body bytes and headers, for tests
    /// that compare responses byte for byte.
    pub async fn request_raw(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
        auth_token: Option<&str>,
    ) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = auth_token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        let body = match body {
            Some(v) => {
                builder = builder.header("Content-Type", "application/json");
                Body::from(serde_json::to_vec(&v).unwrap())
            }
            None => Body::empty(),
        };
        let request = builder.body(body).unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, body_bytes.to_vec())
    }
}
