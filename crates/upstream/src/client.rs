//! HTTP client for the upstream metadata API.

use crate::error::{UpstreamError, UpstreamResult};
use crate::throttle::Throttle;
use async_trait::async_trait;
use bytes::Bytes;
use marquee_core::EntityKind;
use marquee_core::config::UpstreamConfig;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

/// One page of a paginated upstream listing.
#[derive(Debug, Clone)]
pub struct Page {
    pub items: Vec<Value>,
    pub next_page: Option<u32>,
}

/// A single change record from the upstream change feed.
#[derive(Debug, Clone)]
pub struct Change {
    pub kind: EntityKind,
    pub id: i64,
    /// True when the upstream reports the record as deleted.
    pub deleted: bool,
}

/// One page of the upstream change feed.
#[derive(Debug, Clone)]
pub struct ChangePage {
    pub changes: Vec<Change>,
    pub next_page: Option<u32>,
}

/// Client for the upstream TV/movie metadata API.
///
/// Implementations must be safe to share across the cache resolve path and
/// the background sync engine.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Fetch the full record for a single entity.
    async fn fetch(&self, kind: EntityKind, id: i64) -> UpstreamResult<Value>;

    /// Fetch one page of the upstream catalog for a syncable kind.
    async fn fetch_page(&self, kind: EntityKind, page: u32) -> UpstreamResult<Page>;

    /// Fetch one page of a series' episode list.
    async fn fetch_series_episodes(&self, series_id: i64, page: u32) -> UpstreamResult<Page>;

    /// Fetch one page of change records since the given instant.
    async fn changes_since(&self, since: OffsetDateTime, page: u32)
    -> UpstreamResult<ChangePage>;

    /// Download a source image by absolute URL.
    ///
    /// Returns the raw bytes and the response content type, if any.
    async fn download(&self, url: &str) -> UpstreamResult<(Bytes, Option<String>)>;
}

#[derive(Deserialize)]
struct LoginResponse {
    data: LoginData,
}

#[derive(Deserialize)]
struct LoginData {
    token: String,
}

#[derive(Deserialize)]
struct Envelope {
    data: Value,
    #[serde(default)]
    links: Option<Links>,
}

#[derive(Deserialize)]
struct Links {
    #[serde(default)]
    next: Option<Value>,
}

/// Reqwest-backed upstream client with bearer-token authentication.
///
/// The bearer token is obtained lazily from the login endpoint and refreshed
/// once on a 401 response; every request first passes through the shared
/// [`Throttle`].
pub struct HttpUpstream {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    pin: Option<String>,
    bearer: RwLock<Option<String>>,
    throttle: Throttle,
}

impl HttpUpstream {
    pub fn new(config: &UpstreamConfig, throttle: Throttle) -> UpstreamResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            pin: config.pin.clone(),
            bearer: RwLock::new(None),
            throttle,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Path segment for single-entity lookups.
    fn kind_path(kind: EntityKind) -> &'static str {
        match kind {
            EntityKind::Series => "series",
            EntityKind::Movie => "movies",
            EntityKind::Episode => "episodes",
            EntityKind::Season => "seasons",
            EntityKind::Person => "people",
            EntityKind::CollectionPage => "series",
        }
    }

    #[instrument(skip(self))]
    async fn login(&self) -> UpstreamResult<String> {
        let mut body = json!({ "apikey": self.api_key });
        if let Some(pin) = &self.pin {
            body["pin"] = json!(pin);
        }

        let response = self
            .http
            .post(self.url("/login"))
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(UpstreamError::Auth(
                "upstream rejected API key during login".to_string(),
            ));
        }
        if !status.is_success() {
            return Err(UpstreamError::Unavailable(format!(
                "login returned status {status}"
            )));
        }

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::Decode(format!("login response: {e}")))?;

        debug!("obtained upstream bearer token");
        Ok(login.data.token)
    }

    /// Get the cached bearer token, logging in if we don't have one yet.
    async fn bearer(&self) -> UpstreamResult<String> {
        if let Some(token) = self.bearer.read().await.clone() {
            return Ok(token);
        }

        let mut guard = self.bearer.write().await;
        // Another task may have logged in while we waited for the write lock.
        if let Some(token) = guard.clone() {
            return Ok(token);
        }
        let token = self.login().await?;
        *guard = Some(token.clone());
        Ok(token)
    }

    /// Discard the cached bearer so the next request re-authenticates.
    async fn invalidate_bearer(&self) {
        *self.bearer.write().await = None;
    }

    /// Perform an authenticated GET, re-authenticating once on 401.
    async fn get_envelope(&self, path: &str) -> UpstreamResult<Envelope> {
        self.throttle.acquire().await;

        let token = self.bearer().await?;
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(map_transport_error)?;

        let response = if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            warn!(path, "upstream bearer rejected, re-authenticating");
            self.invalidate_bearer().await;
            let token = self.bearer().await?;
            self.http
                .get(self.url(path))
                .bearer_auth(&token)
                .send()
                .await
                .map_err(map_transport_error)?
        } else {
            response
        };

        let status = response.status();
        if !status.is_success() {
            return Err(map_status_error(&response));
        }

        response
            .json()
            .await
            .map_err(|e| UpstreamError::Decode(format!("{path}: {e}")))
    }

    fn next_page(envelope: &Envelope, current: u32) -> Option<u32> {
        match envelope.links.as_ref().and_then(|l| l.next.as_ref()) {
            Some(Value::Null) | None => None,
            Some(_) => Some(current + 1),
        }
    }
}

fn map_transport_error(err: reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Timeout
    } else {
        UpstreamError::Http(err)
    }
}

fn map_status_error(response: &reqwest::Response) -> UpstreamError {
    let status = response.status();
    match status {
        reqwest::StatusCode::NOT_FOUND => UpstreamError::NotFound,
        reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
            UpstreamError::Auth(format!("upstream returned status {status}"))
        }
        reqwest::StatusCode::TOO_MANY_REQUESTS => UpstreamError::RateLimited {
            retry_after_secs: response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok()),
        },
        _ => UpstreamError::Unavailable(format!("upstream returned status {status}")),
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstream {
    #[instrument(skip(self), fields(kind = %kind))]
    async fn fetch(&self, kind: EntityKind, id: i64) -> UpstreamResult<Value> {
        // Collection pages are a gateway-side construct: the id is the page
        // number of the upstream series catalog.
        if kind == EntityKind::CollectionPage {
            let page = self
                .fetch_page(EntityKind::Series, u32::try_from(id).unwrap_or(0))
                .await?;
            return Ok(json!({
                "items": page.items,
                "next_page": page.next_page,
            }));
        }

        let path = format!("/{}/{}/extended", Self::kind_path(kind), id);
        let envelope = self.get_envelope(&path).await?;
        Ok(envelope.data)
    }

    #[instrument(skip(self), fields(kind = %kind))]
    async fn fetch_page(&self, kind: EntityKind, page: u32) -> UpstreamResult<Page> {
        let path = format!("/{}?page={}", Self::kind_path(kind), page);
        let envelope = self.get_envelope(&path).await?;
        let next_page = Self::next_page(&envelope, page);
        let items = match envelope.data {
            Value::Array(items) => items,
            other => {
                return Err(UpstreamError::Decode(format!(
                    "expected array of records, got {other}"
                )));
            }
        };
        Ok(Page { items, next_page })
    }

    #[instrument(skip(self))]
    async fn fetch_series_episodes(&self, series_id: i64, page: u32) -> UpstreamResult<Page> {
        let path = format!("/series/{series_id}/episodes/default?page={page}");
        let envelope = self.get_envelope(&path).await?;
        let next_page = Self::next_page(&envelope, page);
        let items = match envelope.data.get("episodes") {
            Some(Value::Array(items)) => items.clone(),
            _ => {
                return Err(UpstreamError::Decode(
                    "episodes page missing episode list".to_string(),
                ));
            }
        };
        Ok(Page { items, next_page })
    }

    #[instrument(skip(self))]
    async fn changes_since(
        &self,
        since: OffsetDateTime,
        page: u32,
    ) -> UpstreamResult<ChangePage> {
        let path = format!("/updates?since={}&page={}", since.unix_timestamp(), page);
        let envelope = self.get_envelope(&path).await?;
        let next_page = Self::next_page(&envelope, page);

        let records = match envelope.data {
            Value::Array(records) => records,
            // Some deployments return null data for an empty window
            Value::Null => Vec::new(),
            other => {
                return Err(UpstreamError::Decode(format!(
                    "expected array of change records, got {other}"
                )));
            }
        };

        let mut changes = Vec::with_capacity(records.len());
        for record in records {
            let Some(id) = record.get("recordId").and_then(record_id) else {
                continue;
            };
            let Some(kind) = record
                .get("recordType")
                .and_then(Value::as_str)
                .and_then(change_kind)
            else {
                // Record types we don't cache (artwork, translations, ...)
                continue;
            };
            let deleted = record
                .get("method")
                .and_then(Value::as_str)
                .is_some_and(|m| m.eq_ignore_ascii_case("delete"));
            changes.push(Change { kind, id, deleted });
        }

        Ok(ChangePage { changes, next_page })
    }

    #[instrument(skip(self))]
    async fn download(&self, url: &str) -> UpstreamResult<(Bytes, Option<String>)> {
        self.throttle.acquire().await;

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            return Err(map_status_error(&response));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        let bytes = response.bytes().await.map_err(map_transport_error)?;
        Ok((bytes, content_type))
    }
}

/// The change feed reports record ids as either numbers or strings.
fn record_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn change_kind(record_type: &str) -> Option<EntityKind> {
    match record_type {
        "series" => Some(EntityKind::Series),
        "movies" | "movie" => Some(EntityKind::Movie),
        "episodes" | "episode" => Some(EntityKind::Episode),
        "seasons" | "season" => Some(EntityKind::Season),
        "people" | "person" => Some(EntityKind::Person),
        _ => None,
    }
}
