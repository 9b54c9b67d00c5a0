//! Cache layer error types

use thiserror::Error;

/// Message carried by every [`CacheError::Unavailable`].
pub const CACHE_DOWN_MESSAGE: &str = "The cache server is down";

/// Cache layer errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("{message} ({code}): {reason}")]
    Unavailable {
        code: String,
        message: String,
        reason: String,
    },

    #[error("Cache transport error: {0}")]
    Transport(String),

    #[error("{0} not found")]
    KeyNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Cache connection closed")]
    Closed,
}

impl CacheError {
    /// Build the "cache service down" failure with the configured error code.
    pub fn unavailable(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            code: code.into(),
            message: CACHE_DOWN_MESSAGE.to_string(),
            reason: reason.into(),
        }
    }

    /// HTTP-style status code callers can map this error to
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Unavailable { .. } | Self::Closed => 503,
            Self::Transport(_) => 502,
            Self::KeyNotFound(_) => 404,
            Self::Serialization(_) => 500,
            Self::InvalidInput(_) => 400,
        }
    }

    /// Stable machine-readable error code
    #[must_use]
    pub fn error_code(&self) -> &str {
        match self {
            Self::Unavailable { code, .. } => code,
            Self::Transport(_) => "CACHE_TRANSPORT_ERROR",
            Self::KeyNotFound(_) => "KEY_NOT_FOUND",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Closed => "CACHE_CLOSED",
        }
    }

    /// True for the miss signal, never for transport failures.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound(_))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        Self::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_not_found_message_names_key() {
        let err = CacheError::KeyNotFound("sec:abc".to_string());
        assert_eq!(err.to_string(), "sec:abc not found");
        assert!(err.is_not_found());
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn test_unavailable_carries_configured_code() {
        let err = CacheError::unavailable("CACHING_DOWN", "connection refused");
        assert_eq!(err.status_code(), 503);
        assert_eq!(err.error_code(), "CACHING_DOWN");
        assert!(!err.is_not_found());
        assert!(err.to_string().starts_with(CACHE_DOWN_MESSAGE));
    }

    #[test]
    fn test_serde_error_maps_to_serialization() {
        let err: CacheError = serde_json::from_str::<u32>("not json").unwrap_err().into();
        assert!(matches!(err, CacheError::Serialization(_)));
    }
}
