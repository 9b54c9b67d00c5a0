//! In-memory hash store
//!
//! Process-local [`HashStore`] with per-key expiry. Expiry uses
//! `tokio::time::Instant`, so tests can pause and advance the clock.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::traits::{Connector, HashStore, KeyTtl, SharedStore};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};

#[derive(Debug, Default)]
struct Entry {
    fields: HashMap<String, String>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory hash store
#[derive(Debug, Default)]
pub struct InMemoryHashStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryHashStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    // Drop the key if its expiry has passed. Call with the write lock held.
    fn purge_expired(entries: &mut HashMap<String, Entry>, key: &str) {
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
    }
}

#[async_trait]
impl HashStore for InMemoryHashStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries.get(key).is_some_and(|e| !e.is_expired(now)))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool> {
        let mut entries = self.entries.write().await;
        Self::purge_expired(&mut entries, key);

        let entry = entries.entry(key.to_string()).or_default();
        let previous = entry.fields.insert(field.to_string(), value.to_string());
        Ok(previous.is_none())
    }

    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        if fields.is_empty() {
            return Err(CacheError::InvalidInput(
                "hset_multiple requires at least one field".to_string(),
            ));
        }

        let mut entries = self.entries.write().await;
        Self::purge_expired(&mut entries, key);

        let entry = entries.entry(key.to_string()).or_default();
        for (field, value) in fields {
            entry.fields.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .and_then(|e| e.fields.get(field).cloned()))
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.fields.clone())
            .unwrap_or_default())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.write().await;
        Self::purge_expired(&mut entries, key);

        match entries.get_mut(key) {
            Some(entry) => {
                // A TTL past the clock's range never fires
                entry.expires_at = Instant::now().checked_add(ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(match entries.get(key).filter(|e| !e.is_expired(now)) {
            None => KeyTtl::Missing,
            Some(Entry { expires_at: None, .. }) => KeyTtl::Persistent,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => KeyTtl::Expires(at.saturating_duration_since(now)),
        })
    }

    async fn del(&self, key: &str) -> Result<u64> {
        let mut entries = self.entries.write().await;
        Self::purge_expired(&mut entries, key);
        Ok(u64::from(entries.remove(key).is_some()))
    }
}

/// Connector handing out one shared in-memory store
#[derive(Debug, Clone, Default)]
pub struct InMemoryConnector {
    store: Arc<InMemoryHashStore>,
}

impl InMemoryConnector {
    #[must_use]
    pub fn new(store: Arc<InMemoryHashStore>) -> Self {
        Self { store }
    }

    /// The store every connection shares
    #[must_use]
    pub fn store(&self) -> Arc<InMemoryHashStore> {
        Arc::clone(&self.store)
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    async fn connect(&self, _config: &CacheConfig) -> Result<SharedStore> {
        Ok(self.store.clone() as SharedStore)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hset_reports_new_fields() {
        let store = InMemoryHashStore::new();
        assert!(store.hset("k", "f", "1").await.unwrap());
        assert!(!store.hset("k", "f", "2").await.unwrap());
        assert_eq!(store.hget("k", "f").await.unwrap(), Some("2".to_string()));
    }

    #[tokio::test]
    async fn test_absent_key() {
        let store = InMemoryHashStore::new();
        assert!(!store.exists("nope").await.unwrap());
        assert!(store.hgetall("nope").await.unwrap().is_empty());
        assert_eq!(store.ttl("nope").await.unwrap(), KeyTtl::Missing);
        assert!(!store.expire("nope", Duration::from_secs(5)).await.unwrap());
        assert_eq!(store.del("nope").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_expires() {
        let store = InMemoryHashStore::new();
        store.hset("k", "f", "v").await.unwrap();
        assert_eq!(store.ttl("k").await.unwrap(), KeyTtl::Persistent);

        store.expire("k", Duration::from_secs(10)).await.unwrap();
        assert_eq!(
            store.ttl("k").await.unwrap(),
            KeyTtl::Expires(Duration::from_secs(10))
        );

        tokio::time::advance(Duration::from_secs(11)).await;

        assert!(!store.exists("k").await.unwrap());
        assert_eq!(store.hget("k", "f").await.unwrap(), None);
        assert!(store.is_empty().await);

        // A write after expiry starts a fresh, persistent key
        store.hset("k", "g", "w").await.unwrap();
        assert_eq!(store.ttl("k").await.unwrap(), KeyTtl::Persistent);
        assert_eq!(store.hgetall("k").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_expiry_beyond_clock_range_never_fires() {
        let store = InMemoryHashStore::new();
        store.hset("k", "f", "v").await.unwrap();

        assert!(store.expire("k", Duration::from_secs(u64::MAX)).await.unwrap());
        assert_eq!(store.ttl("k").await.unwrap(), KeyTtl::Persistent);
        assert!(store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_hset_multiple_rejects_empty() {
        let store = InMemoryHashStore::new();
        let err = store.hset_multiple("k", &[]).await.unwrap_err();
        assert!(matches!(err, CacheError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_connector_shares_store() {
        let connector = InMemoryConnector::default();
        let config = CacheConfig::default();

        let a = connector.connect(&config).await.unwrap();
        let b = connector.connect(&config).await.unwrap();
        a.hset("k", "f", "v").await.unwrap();

        assert!(b.exists("k").await.unwrap());
        assert_eq!(connector.store().len().await, 1);
    }
}
