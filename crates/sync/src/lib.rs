//! Background reconciliation and artifact processing for Marquee.
//!
//! The engine keeps the durable cache tier aligned with the upstream
//! catalog; the artifact pipeline derives and publishes image variants for
//! the records it touches.

pub mod artifacts;
pub mod engine;
pub mod error;
pub mod scheduler;

#[cfg(test)]
mod testutil;

pub use artifacts::ArtifactPipeline;
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
