//! Client for the upstream TV/movie metadata API.
//!
//! All outbound traffic, whether triggered by a cache miss or by the sync
//! engine, goes through [`HttpUpstream`] and the process-wide [`Throttle`].

pub mod client;
pub mod error;
pub mod throttle;

pub use client::{Change, ChangePage, HttpUpstream, Page, UpstreamClient};
pub use error::{UpstreamError, UpstreamResult};
pub use throttle::Throttle;
