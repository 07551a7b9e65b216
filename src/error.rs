use thiserror::Error;

/// Invalid construction-time configuration. Fatal, never retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("namespace must be a non-empty string")]
    EmptyNamespace,

    #[error("max_active_attempts must be between 1 and {max}, got {value}")]
    InvalidMaxActiveAttempts { value: usize, max: usize },

    #[error("retry_delay_ms must be positive")]
    ZeroRetryDelay,

    #[error("reconciliation_interval_ms must be positive")]
    ZeroReconciliationInterval,

    #[error("invalid backoff policy for {which}: {reason}")]
    InvalidBackoff {
        which: &'static str,
        reason: &'static str,
    },

    #[error("an attempt action is required")]
    MissingAttemptAction,

    #[error("a priority queue store is required")]
    MissingStore,
}

/// Failure of a durable queue operation.
///
/// The store itself never retries; whichever loop issued the call decides
/// what to do next.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// Network or backend failure.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A value could not be encoded for storage.
    #[error("failed to encode value: {0}")]
    Encode(String),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        StorageError::Backend(err.to_string())
    }
}

/// Failure reported by the external attempt action.
///
/// Triggers a delayed re-enqueue; it is never propagated to the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("attempt failed: {message}")]
pub struct AttemptFailure {
    pub message: String,
}

impl AttemptFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure of the canonical pending-work lookup used by reconciliation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("pending work lookup failed: {message}")]
pub struct SourceError {
    pub message: String,
}

impl SourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
