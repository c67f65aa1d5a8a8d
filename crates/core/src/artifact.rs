//! Artifact (artwork) size classes and storage key layout.

use crate::entity::EntityKind;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use time::OffsetDateTime;

/// Known artwork roles attached to entities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Poster,
    Banner,
    Backdrop,
    Headshot,
}

impl AssetKind {
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "poster" => Ok(Self::Poster),
            "banner" => Ok(Self::Banner),
            "backdrop" => Ok(Self::Backdrop),
            "headshot" => Ok(Self::Headshot),
            _ => Err(crate::Error::InvalidAssetKind(s.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Poster => "poster",
            Self::Banner => "banner",
            Self::Backdrop => "backdrop",
            Self::Headshot => "headshot",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fixed ladder of variant sizes produced for every artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeClass {
    Original,
    Large,
    Medium,
    Small,
    Thumbnail,
}

impl SizeClass {
    pub const ALL: [SizeClass; 5] = [
        Self::Original,
        Self::Large,
        Self::Medium,
        Self::Small,
        Self::Thumbnail,
    ];

    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "original" => Ok(Self::Original),
            "large" => Ok(Self::Large),
            "medium" => Ok(Self::Medium),
            "small" => Ok(Self::Small),
            "thumbnail" => Ok(Self::Thumbnail),
            _ => Err(crate::Error::InvalidSizeClass(s.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Large => "large",
            Self::Medium => "medium",
            Self::Small => "small",
            Self::Thumbnail => "thumbnail",
        }
    }

    /// Bounding-box edge in pixels, or `None` for the untouched original.
    /// Sources smaller than the box are never upscaled.
    pub fn max_edge(&self) -> Option<u32> {
        match self {
            Self::Original => None,
            Self::Large => Some(1280),
            Self::Medium => Some(780),
            Self::Small => Some(342),
            Self::Thumbnail => Some(185),
        }
    }
}

impl fmt::Display for SizeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Output encoding for processed variants.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Jpeg,
    Png,
    Webp,
}

impl ImageFormat {
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            "webp" => Ok(Self::Webp),
            _ => Err(crate::Error::InvalidImageFormat(s.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Webp => "webp",
        }
    }

    /// File extension used in storage keys.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Webp => "webp",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Webp => "image/webp",
        }
    }
}

/// A published artifact variant.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactVariant {
    pub entity_kind: EntityKind,
    pub entity_id: i64,
    pub asset_kind: AssetKind,
    pub size_class: SizeClass,
    pub storage_key: String,
    pub byte_size: i64,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub processed_at: OffsetDateTime,
}

/// Content-addressed storage key for one variant.
///
/// Layout: `{kind}/{h[0:2]}/{h[2:4]}/{id}/{asset}/{size}.{ext}` where `h` is
/// the hex SHA-256 of `{kind}:{id}`. The two fan-out directories keep any one
/// directory from accumulating millions of children on flat backends.
pub fn variant_storage_key(
    kind: EntityKind,
    id: i64,
    asset: AssetKind,
    size: SizeClass,
    format: ImageFormat,
) -> String {
    let digest = hex::encode(Sha256::digest(format!("{}:{id}", kind.as_str())));
    format!(
        "{}/{}/{}/{id}/{}/{}.{}",
        kind.as_str(),
        &digest[0..2],
        &digest[2..4],
        asset.as_str(),
        size.as_str(),
        format.extension()
    )
}

/// Prefix under which every variant of an entity lives; used by orphan sweeps.
pub fn entity_storage_prefix(kind: EntityKind, id: i64) -> String {
    let digest = hex::encode(Sha256::digest(format!("{}:{id}", kind.as_str())));
    format!("{}/{}/{}/{id}/", kind.as_str(), &digest[0..2], &digest[2..4])
}
