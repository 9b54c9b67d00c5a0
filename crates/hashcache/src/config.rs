//! # Cache Configuration
//!
//! Defaults, partial overrides and environment resolution for the cache facade.
//!
//! Overrides are merged field by field over [`CacheConfig::default`]. The
//! endpoint is resolved at connect time: `REDIS_INSTANCE_HOST` and
//! `REDIS_INSTANCE_PORT` win over whatever the configuration says.

use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::connection::ReconnectPolicy;
use crate::error::{CacheError, Result};

/// Environment variable overriding the configured host
pub const HOST_ENV: &str = "REDIS_INSTANCE_HOST";

/// Environment variable overriding the configured port
pub const PORT_ENV: &str = "REDIS_INSTANCE_PORT";

/// Field whose key gets the fixed counter TTL on creation
pub const COUNT_FIELD: &str = "Count";

/// Cache settings
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub host: String,
    pub port: u16,
    /// TTL applied to keys created through `cache_write`
    pub user_keys_expire_minutes: u64,
    /// TTL applied when the creating write targets [`COUNT_FIELD`]
    pub count_expire: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            user_keys_expire_minutes: 60,
            count_expire: Duration::from_secs(30 * 60),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl CacheSettings {
    /// Resolve host and port, letting the process environment win.
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint_with(|name| env::var(name).ok())
    }

    /// Resolve host and port through an arbitrary variable lookup.
    ///
    /// Empty or unparseable values fall back to the configured ones.
    pub fn endpoint_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Endpoint {
        let host = lookup(HOST_ENV)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| self.host.clone());
        let port = lookup(PORT_ENV)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(self.port);

        Endpoint { host, port }
    }

    /// Expiry for a key created by a conditional write to `field`
    #[must_use]
    pub fn creation_expiry(&self, field: &str) -> Duration {
        if field == COUNT_FIELD {
            self.count_expire
        } else {
            Duration::from_secs(self.user_keys_expire_minutes.saturating_mul(60))
        }
    }
}

/// Resolved store address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Connection URL understood by the redis client
    #[must_use]
    pub fn url(&self) -> String {
        format!("redis://{}:{}/", self.host, self.port)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Constants shared with calling services
#[derive(Debug, Clone)]
pub struct CacheConstants {
    /// Error code attached to "cache service down" failures
    pub caching_down_code: String,
}

impl Default for CacheConstants {
    fn default() -> Self {
        Self {
            caching_down_code: "CACHING_DOWN".to_string(),
        }
    }
}

/// Complete facade configuration
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    pub settings: CacheSettings,
    pub constants: CacheConstants,
}

impl CacheConfig {
    /// Merge partial overrides over the defaults
    #[must_use]
    pub fn from_overrides(overrides: ConfigOverrides) -> Self {
        let mut config = Self::default();
        config.apply(overrides);
        config
    }

    /// Merge partial overrides over this configuration
    pub fn apply(&mut self, overrides: ConfigOverrides) {
        if let Some(settings) = overrides.settings {
            let s = &mut self.settings;
            if let Some(host) = settings.host {
                s.host = host;
            }
            if let Some(port) = settings.port {
                s.port = port;
            }
            if let Some(minutes) = settings.user_keys_expire_minutes {
                s.user_keys_expire_minutes = minutes;
            }
            if let Some(minutes) = settings.count_expire_minutes {
                s.count_expire = Duration::from_secs(minutes.saturating_mul(60));
            }
            if let Some(reconnect) = settings.reconnect {
                reconnect.apply_to(&mut s.reconnect);
            }
        }

        if let Some(constants) = overrides.constants {
            if let Some(code) = constants.caching_down_code {
                self.constants.caching_down_code = code;
            }
        }
    }
}

/// Partial configuration, every field optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ConfigOverrides {
    pub settings: Option<SettingsOverrides>,
    pub constants: Option<ConstantsOverrides>,
}

impl ConfigOverrides {
    /// Parse overrides from a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read overrides from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CacheError::InvalidInput(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SettingsOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user_keys_expire_minutes: Option<u64>,
    pub count_expire_minutes: Option<u64>,
    pub reconnect: Option<ReconnectOverrides>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConstantsOverrides {
    pub caching_down_code: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReconnectOverrides {
    pub max_retry_time_secs: Option<u64>,
    pub max_times_connected: Option<u32>,
    pub delay_step_ms: Option<u64>,
    pub delay_floor_ms: Option<u64>,
}

impl ReconnectOverrides {
    fn apply_to(self, policy: &mut ReconnectPolicy) {
        if let Some(secs) = self.max_retry_time_secs {
            policy.max_retry_time = Duration::from_secs(secs);
        }
        if let Some(times) = self.max_times_connected {
            policy.max_times_connected = times;
        }
        if let Some(ms) = self.delay_step_ms {
            policy.delay_step = Duration::from_millis(ms);
        }
        if let Some(ms) = self.delay_floor_ms {
            policy.delay_floor = Duration::from_millis(ms);
        }
    }
}
