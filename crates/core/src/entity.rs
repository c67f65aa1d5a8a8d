//! Entity model: kinds, keys, and freshness classes.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// Kinds of upstream entities the gateway caches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    Series,
    Movie,
    Episode,
    Season,
    Person,
    /// One page of a paginated upstream listing, keyed by page number.
    CollectionPage,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        Self::Series,
        Self::Movie,
        Self::Episode,
        Self::Season,
        Self::Person,
        Self::CollectionPage,
    ];

    /// Kinds that participate in full/incremental sync (collection pages are
    /// derived, not synced).
    pub const SYNCABLE: [EntityKind; 5] = [
        Self::Series,
        Self::Movie,
        Self::Episode,
        Self::Season,
        Self::Person,
    ];

    /// Parse from the URL/storage slug.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "series" => Ok(Self::Series),
            "movie" => Ok(Self::Movie),
            "episode" => Ok(Self::Episode),
            "season" => Ok(Self::Season),
            "person" => Ok(Self::Person),
            "collection-page" => Ok(Self::CollectionPage),
            _ => Err(crate::Error::InvalidEntityKind(s.to_string())),
        }
    }

    /// Get the slug used in URLs, storage keys, and database columns.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Series => "series",
            Self::Movie => "movie",
            Self::Episode => "episode",
            Self::Season => "season",
            Self::Person => "person",
            Self::CollectionPage => "collection-page",
        }
    }

    /// Freshness class for cached payloads of this kind.
    ///
    /// Series metadata changes while a show airs (new episodes, status,
    /// artwork churn), so everything attached to a series is dynamic.
    /// Movies and people settle once released.
    pub fn data_class(&self) -> DataClass {
        match self {
            Self::Movie | Self::Person => DataClass::Static,
            Self::Series | Self::Episode | Self::Season | Self::CollectionPage => {
                DataClass::Dynamic
            }
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Freshness class controlling cache TTLs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataClass {
    /// Rarely changes after publication; cached for 24 hours.
    Static,
    /// Changes while content airs; cached for 1 hour.
    Dynamic,
}

impl DataClass {
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "static" => Ok(Self::Static),
            "dynamic" => Ok(Self::Dynamic),
            _ => Err(crate::Error::InvalidEntityKind(format!(
                "unknown data class: {s}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Dynamic => "dynamic",
        }
    }

    /// Hot-tier TTL in seconds for this class.
    pub fn ttl_secs(&self) -> u64 {
        match self {
            Self::Static => crate::STATIC_TTL_SECS,
            Self::Dynamic => crate::DYNAMIC_TTL_SECS,
        }
    }
}

/// Unique key for a cached entity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: i64,
}

impl EntityKey {
    pub fn new(kind: EntityKind, id: i64) -> Self {
        Self { kind, id }
    }

    /// Parse from the `{kind}/{id}` form used in URLs and logs.
    pub fn parse(kind: &str, id: &str) -> crate::Result<Self> {
        let kind = EntityKind::parse(kind)?;
        let id: i64 = id
            .parse()
            .map_err(|_| crate::Error::InvalidEntityId(id.to_string()))?;
        if id < 0 {
            return Err(crate::Error::InvalidEntityId(id.to_string()));
        }
        Ok(Self { kind, id })
    }
}

impl fmt::Debug for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityKey({}/{})", self.kind, self.id)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// A cached entity payload with its provenance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CachedEntity {
    pub key: EntityKey,
    /// Raw upstream payload, served verbatim.
    pub payload: serde_json::Value,
    pub data_class: DataClass,
    /// When the payload was last confirmed against the upstream.
    #[serde(with = "time::serde::rfc3339")]
    pub refreshed_at: OffsetDateTime,
    /// True when the payload is past its TTL and was served anyway because
    /// the upstream was unreachable.
    #[serde(default)]
    pub stale: bool,
}

impl CachedEntity {
    /// Check if the payload is still within its TTL.
    pub fn is_fresh(&self, now: OffsetDateTime) -> bool {
        let age = now - self.refreshed_at;
        age.whole_seconds() >= 0 && (age.whole_seconds() as u64) < self.data_class.ttl_secs()
    }
}
