//! Repository traits, one per concern.

pub mod credentials;
pub mod entries;
pub mod jobs;
pub mod variants;

pub use credentials::CredentialRepo;
pub use entries::EntryRepo;
pub use jobs::{SyncJobKind, SyncJobRepo, SyncJobState, SyncStats};
pub use variants::{ArtifactJobState, VariantRepo};
