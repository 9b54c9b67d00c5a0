//! # Connection Module
//!
//! Lifecycle of the one shared store handle: lazy creation on first use,
//! reuse afterwards, explicit reset, and the reconnect policy applied by the
//! Redis link.

pub mod policy;
#[cfg(feature = "redis")]
pub mod redis_link;

pub use policy::{FailureKind, ReconnectDecision, ReconnectPolicy, RetryState, StopReason};
#[cfg(feature = "redis")]
pub use redis_link::{RedisConnector, RedisHashStore};

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::Result;
use crate::store::{Connector, SharedStore};

/// Holder of the shared handle.
///
/// The lock is held across the connect call, so concurrent first users wait
/// for one connection instead of racing to open several.
pub struct ConnectionSlot {
    connector: Arc<dyn Connector>,
    handle: Mutex<Option<SharedStore>>,
}

impl ConnectionSlot {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            handle: Mutex::new(None),
        }
    }

    /// Return the live handle, creating it on first use
    pub async fn get(&self, config: &CacheConfig) -> Result<SharedStore> {
        let mut handle = self.handle.lock().await;
        if let Some(store) = handle.as_ref() {
            return Ok(Arc::clone(store));
        }

        debug!("Opening shared cache connection");
        let store = self.connector.connect(config).await?;
        *handle = Some(Arc::clone(&store));
        Ok(store)
    }

    /// Whether a handle has been created
    pub async fn is_open(&self) -> bool {
        self.handle.lock().await.is_some()
    }

    /// Close and drop the handle; the next [`get`](Self::get) reconnects
    pub async fn reset(&self) -> Result<()> {
        let taken = self.handle.lock().await.take();
        if let Some(store) = taken {
            if let Err(e) = store.close().await {
                warn!(error = %e, "Failed to close cache connection");
                return Err(e);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ConnectionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSlot").finish_non_exhaustive()
    }
}
