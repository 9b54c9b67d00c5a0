//! # Store Traits
//!
//! Abstract hash-store interface consumed by the facade.
//! Implementations can be swapped for different backends (Redis, in-memory, mock).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::CacheConfig;
use crate::error::Result;

/// Remaining lifetime of a key as reported by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// Key does not exist
    Missing,
    /// Key exists without an expiry
    Persistent,
    /// Key expires after this duration
    Expires(Duration),
}

/// Hash-oriented key-value store primitives
#[async_trait]
pub trait HashStore: Send + Sync {
    /// Whether `key` currently exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Set one field; returns true when the field is new
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool>;

    /// Set several fields in one batched call
    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> Result<()>;

    /// Get one field
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Get every field of a hash; an absent key yields an empty map
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Set a key's expiry; returns false when the key does not exist
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Inspect a key's remaining lifetime
    async fn ttl(&self, key: &str) -> Result<KeyTtl>;

    /// Delete a key; returns the number of keys removed
    async fn del(&self, key: &str) -> Result<u64>;

    /// Release the underlying connection
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Shared store handle
pub type SharedStore = Arc<dyn HashStore>;

/// Opens the shared store handle on first use
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &CacheConfig) -> Result<SharedStore>;
}
