//! # Cache Facade
//!
//! Field-level reads and writes on hash keys, with expiry policy and
//! miss/error differentiation, over one lazily opened shared connection.
//!
//! ## Expiry rules
//!
//! | Operation | When the TTL is set | TTL |
//! |-----------|---------------------|-----|
//! | `cache_write` | only when the write created the key | 30 min for `Count`, else configured minutes |
//! | `cache_multi_write` | always | caller-supplied minutes |
//! | `cache_esb_result` | never | - |
//!
//! The exists-then-write sequences are not atomic. Two callers creating the
//! same key concurrently may both set its TTL.

use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::{CacheConfig, ConfigOverrides};
use crate::connection::ConnectionSlot;
use crate::error::{CacheError, Result};
use crate::store::{Connector, InMemoryConnector, InMemoryHashStore, KeyTtl, SharedStore};

/// What a successful write did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteReport {
    pub fields_written: usize,
    /// TTL armed by this write, `None` when the key's expiry was left alone
    pub expiry_set: Option<Duration>,
}

/// Explicit opt-out for best-effort writes.
///
/// `cache_write` and `cache_multi_write` already log their failures, so a
/// caller that doesn't care about the outcome can discard it here.
pub trait BestEffort<T> {
    fn best_effort(self) -> Option<T>;
}

impl<T> BestEffort<T> for Result<T> {
    fn best_effort(self) -> Option<T> {
        self.ok()
    }
}

/// Configuration plus the slot holding the shared connection
#[derive(Debug)]
pub struct CacheContext {
    config: CacheConfig,
    slot: ConnectionSlot,
}

impl CacheContext {
    pub fn new(config: CacheConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            slot: ConnectionSlot::new(connector),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }
}

/// Cache facade
#[derive(Debug, Clone)]
pub struct CacheFacade {
    ctx: Arc<CacheContext>,
}

impl CacheFacade {
    #[must_use]
    pub fn new(ctx: CacheContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    /// Facade over any connector
    #[must_use]
    pub fn with_connector(config: CacheConfig, connector: Arc<dyn Connector>) -> Self {
        Self::new(CacheContext::new(config, connector))
    }

    /// Facade over Redis, with overrides merged over the defaults
    #[cfg(feature = "redis")]
    #[must_use]
    pub fn redis(overrides: ConfigOverrides) -> Self {
        Self::with_connector(
            CacheConfig::from_overrides(overrides),
            Arc::new(crate::connection::RedisConnector),
        )
    }

    /// Facade over a fresh process-local store, returned alongside it
    #[must_use]
    pub fn in_memory(overrides: ConfigOverrides) -> (Self, Arc<InMemoryHashStore>) {
        let connector = InMemoryConnector::default();
        let store = connector.store();
        let facade = Self::with_connector(CacheConfig::from_overrides(overrides), Arc::new(connector));
        (facade, store)
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        self.ctx.config()
    }

    /// Shared store handle, opened on first use
    pub async fn connection(&self) -> Result<SharedStore> {
        self.ctx.slot.get(&self.ctx.config).await
    }

    /// Close the shared handle; the next operation opens a new one
    pub async fn reset(&self) -> Result<()> {
        self.ctx.slot.reset().await
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Write one field, arming the key's TTL only if this write created it.
    ///
    /// Failures are logged here and also returned; see [`BestEffort`].
    pub async fn cache_write<T>(&self, key: &str, field: &str, value: &T) -> Result<WriteReport>
    where
        T: Serialize + ?Sized,
    {
        let result = self.write_field(key, field, value).await;
        if let Err(e) = &result {
            error!(key, field, error = %e, "Unable to cache write");
        }
        result
    }

    async fn write_field<T>(&self, key: &str, field: &str, value: &T) -> Result<WriteReport>
    where
        T: Serialize + ?Sized,
    {
        validate_key(key)?;
        validate_field(field)?;
        let json = serde_json::to_string(value)?;
        let store = self.connection().await?;

        let existed = store.exists(key).await?;
        store.hset(key, field, &json).await?;
        info!(key, field, data = %json, "Cache write succeeded");

        let expiry_set = if existed {
            None
        } else {
            let ttl = self.config().settings.creation_expiry(field);
            store.expire(key, ttl).await?;
            Some(ttl)
        };

        Ok(WriteReport {
            fields_written: 1,
            expiry_set,
        })
    }

    /// Write many fields in one batch, then always set the key's TTL.
    ///
    /// Failures are logged here and also returned; see [`BestEffort`].
    pub async fn cache_multi_write<I, F, V>(
        &self,
        key: &str,
        fields: I,
        expires_in_minutes: u64,
    ) -> Result<WriteReport>
    where
        I: IntoIterator<Item = (F, V)>,
        F: Into<String>,
        V: Serialize,
    {
        let result = self.write_fields(key, fields, expires_in_minutes).await;
        if let Err(e) = &result {
            error!(key, expires_in_minutes, error = %e, "Unable to cache multi write");
        }
        result
    }

    async fn write_fields<I, F, V>(
        &self,
        key: &str,
        fields: I,
        expires_in_minutes: u64,
    ) -> Result<WriteReport>
    where
        I: IntoIterator<Item = (F, V)>,
        F: Into<String>,
        V: Serialize,
    {
        validate_key(key)?;
        let pairs = fields
            .into_iter()
            .map(|(field, value)| -> Result<(String, String)> {
                let field = field.into();
                validate_field(&field)?;
                Ok((field, serde_json::to_string(&value)?))
            })
            .collect::<Result<Vec<(String, String)>>>()?;
        if pairs.is_empty() {
            return Err(CacheError::InvalidInput(format!(
                "no fields given for key {key}"
            )));
        }

        let store = self.connection().await?;
        store.hset_multiple(key, &pairs).await?;
        info!(
            key,
            fields = pairs.len(),
            expires = %format_args!("{expires_in_minutes} min"),
            "Cache multi write succeeded"
        );

        let ttl = Duration::from_secs(expires_in_minutes.saturating_mul(60));
        store.expire(key, ttl).await?;

        Ok(WriteReport {
            fields_written: pairs.len(),
            expiry_set: Some(ttl),
        })
    }

    /// Write one field into a key that must already exist.
    ///
    /// Never creates the key: an absent key yields [`CacheError::KeyNotFound`]
    /// and nothing is written.
    pub async fn cache_esb_result<T>(&self, key: &str, field: &str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        validate_key(key)?;
        validate_field(field)?;
        let json = serde_json::to_string(value)?;
        let store = self.connection().await?;

        if !store.exists(key).await? {
            debug!(key, field, "Key was not found, result not cached");
            return Err(CacheError::KeyNotFound(key.to_string()));
        }

        store.hset(key, field, &json).await?;
        Ok(())
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Read and parse one field
    pub async fn fetch_esb_result<T: DeserializeOwned>(&self, key: &str, field: &str) -> Result<T> {
        let fetched = match self.connection().await {
            Ok(store) => store.hget(key, field).await,
            Err(e) => Err(e),
        };

        match fetched {
            Err(e) => {
                debug!(key, field, error = %e, "Unable to fetch - cache error");
                Err(e)
            }
            Ok(None) => {
                info!(key, field, "CACHEMISS: key and/or field was not found");
                Err(CacheError::KeyNotFound(key.to_string()))
            }
            Ok(Some(raw)) => {
                info!(key, field, "CACHEHIT: key and field were found");
                debug!(key, field, value = %raw, "Cache hit payload");
                Ok(serde_json::from_str(&raw)?)
            }
        }
    }

    /// Every field of a key as stored, without JSON parsing.
    ///
    /// An absent key yields an empty map.
    pub async fn fetch_objects(&self, key: &str) -> Result<HashMap<String, String>> {
        let store = self.connection().await?;
        store.hgetall(key).await
    }

    /// Every field of a key, each parsed as JSON
    pub async fn fetch_objects_json(
        &self,
        key: &str,
    ) -> Result<HashMap<String, serde_json::Value>> {
        self.fetch_objects(key)
            .await?
            .into_iter()
            .map(|(field, raw)| match serde_json::from_str::<serde_json::Value>(&raw) {
                Ok(value) => Ok((field, value)),
                Err(e) => Err(CacheError::Serialization(format!("field {field}: {e}"))),
            })
            .collect()
    }

    /// Remaining lifetime of a key
    pub async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        let store = self.connection().await?;
        store.ttl(key).await
    }

    // =========================================================================
    // DELETION
    // =========================================================================

    /// Delete a key with all its fields; returns the number of keys removed
    pub async fn delete_key(&self, key: &str) -> Result<u64> {
        let store = self.connection().await?;
        store.del(key).await
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidInput("key must not be empty".to_string()));
    }
    Ok(())
}

fn validate_field(field: &str) -> Result<()> {
    if field.is_empty() {
        return Err(CacheError::InvalidInput("field must not be empty".to_string()));
    }
    Ok(())
}
