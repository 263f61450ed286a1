//! storage-adapters
//!
//! Implementations of the storage-facing ports: relational store, in-memory
//! store, local image files and the per-client rate limiter.

pub mod media;
pub mod memory;
pub mod rate_limit;

#[cfg(feature = "db-postgres")]
pub mod postgres;

pub use media::LocalImageStore;
pub use memory::InMemoryStore;
pub use rate_limit::{InMemoryRateLimiter, RateLimitPolicy};

#[cfg(feature = "db-postgres")]
pub use postgres::PgStore;
