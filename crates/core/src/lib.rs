//! Core domain types and shared logic for the marquee caching gateway.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Entity kinds, keys, and freshness classes
//! - API credentials and secret hashing
//! - Artifact size classes and storage key layout
//! - Configuration types
//! - Shared error types

pub mod artifact;
pub mod config;
pub mod credential;
pub mod entity;
pub mod error;
pub mod secret;

pub use artifact::{
    ArtifactVariant, AssetKind, ImageFormat, SizeClass, entity_storage_prefix, variant_storage_key,
};
pub use credential::{
    Credential, CredentialId, CreateCredentialRequest, CreateCredentialResponse,
    UpdateCredentialRequest,
};
pub use entity::{CachedEntity, DataClass, EntityKey, EntityKind};
pub use error::{Error, Result};
pub use secret::{SecretHash, constant_time_eq, dummy_hash, generate_secret};

/// TTL for dynamic-class entities in the hot tier: 1 hour.
pub const DYNAMIC_TTL_SECS: u64 = 3600;

/// TTL for static-class entities in the hot tier: 24 hours.
pub const STATIC_TTL_SECS: u64 = 24 * 3600;

/// TTL for negative (not-found) cache entries: 5 minutes.
pub const NEGATIVE_TTL_SECS: u64 = 300;
