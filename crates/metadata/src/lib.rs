//! Durable metadata store for the marquee caching gateway.
//!
//! This crate provides the control-plane data model:
//! - API credentials and usage counters
//! - The durable cache tier (entity payloads, tombstones, delete candidates)
//! - Sync jobs and cursors
//! - Artifact variants and processing jobs

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use store::{MetadataStore, SqliteStore};

use marquee_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite { path } => {
            let store = SqliteStore::new(path).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
