//! # Hashcache
//!
//! Cache facade over a Redis-style hash store.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Calling Service                       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         CacheFacade                          │
//! │   (cache_write, cache_multi_write, cache_esb_result,         │
//! │    fetch_esb_result, fetch_objects, delete_key)              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │            ConnectionSlot (one lazily opened handle)         │
//! └─────────────────────────────────────────────────────────────┘
//!                    │                   │
//!                    ▼                   ▼
//! ┌─────────────────────────┐   ┌──────────────────────────────┐
//! │     RedisHashStore      │   │      InMemoryHashStore       │
//! │  (reconnect policy)     │   │      (tests, local runs)     │
//! └─────────────────────────┘   └──────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - `redis`: Enable the Redis backend (default)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hashcache::{create, BestEffort, ConfigOverrides};
//!
//! let cache = create(ConfigOverrides::default());
//!
//! // Arms the configured TTL because this write creates the key
//! cache.cache_write("user:42", "profile", &profile).await.best_effort();
//!
//! let profile: Profile = cache.fetch_esb_result("user:42", "profile").await?;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod connection;
pub mod error;
pub mod facade;
pub mod store;

// Re-export commonly used types
pub use config::{CacheConfig, CacheConstants, CacheSettings, ConfigOverrides, Endpoint};
pub use connection::{ConnectionSlot, ReconnectPolicy};
#[cfg(feature = "redis")]
pub use connection::{RedisConnector, RedisHashStore};
pub use error::{CacheError, Result};
pub use facade::{BestEffort, CacheContext, CacheFacade, WriteReport};
pub use store::{Connector, HashStore, InMemoryConnector, InMemoryHashStore, KeyTtl, SharedStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build a Redis-backed facade with overrides merged over the defaults.
///
/// No connection is made until the first operation.
#[cfg(feature = "redis")]
#[must_use]
pub fn create(overrides: ConfigOverrides) -> CacheFacade {
    CacheFacade::redis(overrides)
}
