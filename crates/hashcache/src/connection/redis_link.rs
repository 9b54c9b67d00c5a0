//! # Redis Link
//!
//! Redis-backed [`HashStore`] over one multiplexed connection, supervised by
//! the [`ReconnectPolicy`].
//!
//! Commands are never queued while the link is down: they fail fast with a
//! transport error during an outage and with `Unavailable` once the policy
//! has given up.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisError, RedisResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info};

use super::policy::{FailureKind, ReconnectDecision, ReconnectPolicy, RetryState, StopReason};
use crate::config::{CacheConfig, Endpoint};
use crate::error::{CacheError, Result};
use crate::store::{Connector, HashStore, KeyTtl, SharedStore};

enum LinkState {
    Connected(MultiplexedConnection),
    Reconnecting,
    Down(StopReason),
    Closed,
}

struct Link {
    client: Client,
    endpoint: Endpoint,
    policy: ReconnectPolicy,
    down_code: String,
    state: RwLock<LinkState>,
    retry: Mutex<RetryState>,
}

impl Link {
    async fn on_connected(&self, conn: MultiplexedConnection) {
        let mut state = self.state.write().await;
        if matches!(*state, LinkState::Closed) {
            return;
        }
        *state = LinkState::Connected(conn);

        let mut retry = self.retry.lock().await;
        retry.on_connected();
        info!(
            endpoint = %self.endpoint,
            times_connected = retry.times_connected,
            "Connected to cache server"
        );
    }

    async fn on_failure(&self, err: &RedisError) -> ReconnectDecision {
        let kind = failure_kind(err);
        let mut retry = self.retry.lock().await;
        let attempt = retry.on_failure();
        error!(endpoint = %self.endpoint, attempt, error = %err, "Cache client error");

        let decision = self.policy.decide(&retry, kind);
        if let ReconnectDecision::RetryAfter(delay) = decision {
            retry.on_scheduled(delay);
        }
        decision
    }

    async fn give_up(&self, reason: StopReason) -> CacheError {
        let mut state = self.state.write().await;
        if !matches!(*state, LinkState::Closed) {
            *state = LinkState::Down(reason);
        }
        error!(endpoint = %self.endpoint, %reason, "Stopped reconnecting to cache server");
        CacheError::unavailable(&self.down_code, reason.describe())
    }

    async fn is_closed(&self) -> bool {
        matches!(*self.state.read().await, LinkState::Closed)
    }
}

/// Reconnect loop, one per outage.
async fn supervise(link: Arc<Link>, first_delay: Duration) {
    let mut delay = first_delay;
    loop {
        info!(
            endpoint = %link.endpoint,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Attempting to reconnect to cache server"
        );
        tokio::time::sleep(delay).await;
        if link.is_closed().await {
            return;
        }

        match link.client.get_multiplexed_async_connection().await {
            Ok(conn) => {
                link.on_connected(conn).await;
                return;
            }
            Err(err) => match link.on_failure(&err).await {
                ReconnectDecision::RetryAfter(next) => delay = next,
                ReconnectDecision::Stop(reason) => {
                    link.give_up(reason).await;
                    return;
                }
            },
        }
    }
}

fn failure_kind(err: &RedisError) -> FailureKind {
    if err.is_connection_refusal() {
        FailureKind::Refused
    } else {
        FailureKind::Transport
    }
}

fn is_link_failure(err: &RedisError) -> bool {
    err.is_io_error() || err.is_connection_dropped()
}

fn to_seconds(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)
}

/// Redis hash store with a supervised shared connection
#[derive(Clone)]
pub struct RedisHashStore {
    link: Arc<Link>,
}

impl RedisHashStore {
    /// Connect to the endpoint resolved from `config` and the environment.
    pub async fn open(config: &CacheConfig) -> Result<Self> {
        Self::open_at(config, config.settings.endpoint()).await
    }

    /// Connect to an explicit endpoint, ignoring host/port settings.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` when the server refuses the connection, and a
    /// transport error when the URL is invalid. Other first-connect failures
    /// hand the link to the reconnect loop and return the handle.
    pub async fn open_at(config: &CacheConfig, endpoint: Endpoint) -> Result<Self> {
        let client = Client::open(endpoint.url())?;

        let store = Self {
            link: Arc::new(Link {
                client,
                endpoint,
                policy: config.settings.reconnect,
                down_code: config.constants.caching_down_code.clone(),
                state: RwLock::new(LinkState::Reconnecting),
                retry: Mutex::new(RetryState::default()),
            }),
        };
        info!(endpoint = %store.link.endpoint, "Cache client created");

        match store.link.client.get_multiplexed_async_connection().await {
            Ok(conn) => store.link.on_connected(conn).await,
            Err(err) => match store.link.on_failure(&err).await {
                ReconnectDecision::RetryAfter(delay) => {
                    tokio::spawn(supervise(Arc::clone(&store.link), delay));
                }
                ReconnectDecision::Stop(reason) => return Err(store.link.give_up(reason).await),
            },
        }

        Ok(store)
    }

    /// Resolved server address
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.link.endpoint
    }

    /// Current connection, or the reason there is none
    async fn connection(&self) -> Result<MultiplexedConnection> {
        match &*self.link.state.read().await {
            LinkState::Connected(conn) => Ok(conn.clone()),
            LinkState::Reconnecting => Err(CacheError::Transport(format!(
                "reconnecting to cache server at {}",
                self.link.endpoint
            ))),
            LinkState::Down(reason) => Err(CacheError::unavailable(
                &self.link.down_code,
                reason.describe(),
            )),
            LinkState::Closed => Err(CacheError::Closed),
        }
    }

    /// Map a command result, starting a reconnect when the link dropped.
    async fn check<T>(&self, result: RedisResult<T>) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                if is_link_failure(&err) {
                    self.link_lost(&err).await;
                }
                Err(err.into())
            }
        }
    }

    async fn link_lost(&self, err: &RedisError) {
        {
            let mut state = self.link.state.write().await;
            // Only the first reporter of an outage starts the loop
            if !matches!(*state, LinkState::Connected(_)) {
                return;
            }
            *state = LinkState::Reconnecting;
        }

        match self.link.on_failure(err).await {
            ReconnectDecision::RetryAfter(delay) => {
                tokio::spawn(supervise(Arc::clone(&self.link), delay));
            }
            ReconnectDecision::Stop(reason) => {
                self.link.give_up(reason).await;
            }
        }
    }
}

#[async_trait]
impl HashStore for RedisHashStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let result = conn.exists(key).await;
        self.check(result).await
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let result: RedisResult<i64> = conn.hset(key, field, value).await;
        Ok(self.check(result).await? > 0)
    }

    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        if fields.is_empty() {
            return Err(CacheError::InvalidInput(
                "hset_multiple requires at least one field".to_string(),
            ));
        }
        let mut conn = self.connection().await?;
        let result: RedisResult<()> = conn.hset_multiple(key, fields).await;
        self.check(result).await
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        let result = conn.hget(key, field).await;
        self.check(result).await
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.connection().await?;
        let result = conn.hgetall(key).await;
        self.check(result).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection().await?;
        let result = conn.expire(key, to_seconds(ttl)).await;
        self.check(result).await
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        let mut conn = self.connection().await?;
        let result: RedisResult<i64> = conn.ttl(key).await;
        Ok(match self.check(result).await? {
            -2 => KeyTtl::Missing,
            secs if secs < 0 => KeyTtl::Persistent,
            secs => KeyTtl::Expires(Duration::from_secs(secs.unsigned_abs())),
        })
    }

    async fn del(&self, key: &str) -> Result<u64> {
        let mut conn = self.connection().await?;
        let result = conn.del(key).await;
        self.check(result).await
    }

    async fn close(&self) -> Result<()> {
        *self.link.state.write().await = LinkState::Closed;
        debug!(endpoint = %self.link.endpoint, "Cache connection closed");
        Ok(())
    }
}

/// Connector opening a [`RedisHashStore`]
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisConnector;

#[async_trait]
impl Connector for RedisConnector {
    async fn connect(&self, config: &CacheConfig) -> Result<SharedStore> {
        let store = RedisHashStore::open(config).await?;
        Ok(Arc::new(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConstants, ConfigOverrides};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn loopback(port: u16) -> Endpoint {
        Endpoint {
            host: "127.0.0.1".to_string(),
            port,
        }
    }

    fn config_with_code(code: &str) -> CacheConfig {
        let mut config = CacheConfig {
            constants: CacheConstants {
                caching_down_code: code.to_string(),
            },
            ..Default::default()
        };
        config.settings.reconnect = ReconnectPolicy {
            delay_step: Duration::from_millis(10),
            delay_floor: Duration::from_millis(20),
            ..Default::default()
        };
        config
    }

    /// Server that accepts every connection and hangs up at once
    async fn hang_up_server() -> (u16, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                drop(stream);
            }
        });
        (port, task)
    }

    #[tokio::test]
    async fn test_refused_connection_is_unavailable() {
        // Nothing listens on port 1 on loopback
        let config = config_with_code("NODE_CACHING_DOWN");

        let Err(err) = RedisHashStore::open_at(&config, loopback(1)).await else {
            panic!("connection to a closed port should fail");
        };
        assert_eq!(err.status_code(), 503);
        assert_eq!(err.error_code(), "NODE_CACHING_DOWN");
    }

    #[tokio::test]
    async fn test_outage_fails_fast_then_gives_up_when_refused() {
        let config = config_with_code("NODE_CACHING_DOWN");
        let (port, server) = hang_up_server().await;

        let store = RedisHashStore::open_at(&config, loopback(port))
            .await
            .unwrap();
        assert_eq!(store.endpoint(), &loopback(port));

        // The server drops every link, so commands fail without queueing
        let err = store.exists("k").await.unwrap_err();
        assert!(matches!(err, CacheError::Transport(_)), "got {err:?}");

        // Take the server away: the next reconnect is refused
        server.abort();
        let _ = server.await;

        let mut last = err;
        for _ in 0..250 {
            match store.exists("k").await {
                Err(err @ CacheError::Unavailable { .. }) => {
                    last = err;
                    break;
                }
                Err(err) => last = err,
                Ok(found) => panic!("no server, yet exists returned {found}"),
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(last.status_code(), 503, "got {last:?}");
        assert_eq!(last.error_code(), "NODE_CACHING_DOWN");

        // Once given up, the link stays down
        let err = store.hget("k", "f").await.unwrap_err();
        assert_eq!(err.error_code(), "NODE_CACHING_DOWN");
    }

    #[tokio::test]
    async fn test_closed_store_rejects_commands() {
        let config = config_with_code("CACHING_DOWN");
        let (port, server) = hang_up_server().await;

        let store = RedisHashStore::open_at(&config, loopback(port))
            .await
            .unwrap();
        store.close().await.unwrap();

        assert_eq!(store.exists("anything").await.unwrap_err(), CacheError::Closed);
        assert_eq!(store.del("anything").await.unwrap_err(), CacheError::Closed);

        server.abort();
    }

    // Note: the test below requires a running Redis instance on localhost

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_redis_hash_roundtrip() {
        let config = CacheConfig::from_overrides(ConfigOverrides::default());
        let store = RedisHashStore::open(&config).await.unwrap();
        let key = "hashcache:test:roundtrip";

        store.del(key).await.unwrap();
        assert!(!store.exists(key).await.unwrap());

        assert!(store.hset(key, "a", "1").await.unwrap());
        store
            .hset_multiple(key, &[("b".to_string(), "2".to_string())])
            .await
            .unwrap();
        assert_eq!(store.hget(key, "a").await.unwrap(), Some("1".to_string()));
        assert_eq!(store.hgetall(key).await.unwrap().len(), 2);

        assert_eq!(store.ttl(key).await.unwrap(), KeyTtl::Persistent);
        assert!(store.expire(key, Duration::from_secs(60)).await.unwrap());
        assert!(matches!(store.ttl(key).await.unwrap(), KeyTtl::Expires(_)));

        assert_eq!(store.del(key).await.unwrap(), 1);
        assert_eq!(store.ttl(key).await.unwrap(), KeyTtl::Missing);
    }
}
