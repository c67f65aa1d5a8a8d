//! HTTP request handlers.

pub mod admin;
pub mod auth;
pub mod entities;
pub mod health;

pub use admin::*;
pub use auth::*;
pub use entities::*;
pub use health::*;
