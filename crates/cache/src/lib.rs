//! Tiered read-through cache for upstream metadata.
//!
//! The hot tier is an in-process bounded map; the durable tier lives in the
//! metadata store. Misses collapse into a single upstream fetch per key, and
//! expired payloads are served stale when the upstream is unreachable.

pub mod error;
pub mod flight;
pub mod hot;
pub mod tiered;

pub use error::{CacheError, CacheResult};
pub use hot::{HotTier, HotValue};
pub use tiered::TieredCache;
