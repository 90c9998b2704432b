//! Store error types and result alias.
//!
//! Every [`StateStore`](crate::StateStore) implementation maps its internal
//! failures to [`StoreError`]. Callers decide what a failure means for them:
//! the quota ledger surfaces it as an availability problem, the response
//! cache degrades it to a miss.
//!
//! # Example
//!
//! ```
//! use admission_storage::{StoreError, StoreResult};
//!
//! fn lookup(reachable: bool) -> StoreResult<()> {
//!     if reachable { Ok(()) } else { Err(StoreError::connection("store unreachable")) }
//! }
//!
//! assert!(lookup(false).unwrap_err().is_transient());
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to the shared state store.
///
/// Messages never carry key material: callers pass hashed record keys, and
/// the variants below only describe the failure class.
///
/// # Non-exhaustive
///
/// New variants may be added without a semver-breaking change. Downstream
/// match expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Network or connection-level failure (refused, reset, pool exhausted).
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
        /// The underlying error that caused this connection failure.
        #[source]
        source: Option<BoxError>,
    },

    /// The operation exceeded its deadline.
    #[error("Operation timeout after {elapsed_ms}ms")]
    Timeout {
        /// Deadline that was exceeded, in milliseconds.
        elapsed_ms: u64,
    },

    /// A stored value could not be decoded (e.g. a non-numeric counter).
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the decoding failure.
        message: String,
        /// The underlying error, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// Backend-specific failure that fits no other class.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error, if any.
        #[source]
        source: Option<BoxError>,
    },
}

impl StoreError {
    /// Creates a new `Connection` error with the given message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Creates a new `Connection` error with a message and source error.
    #[must_use]
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Timeout` error for the given deadline.
    #[must_use]
    pub fn timeout(deadline: std::time::Duration) -> Self {
        Self::Timeout { elapsed_ms: deadline.as_millis() as u64 }
    }

    /// Creates a new `Serialization` error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `Internal` error with a message and source error.
    #[must_use]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Returns `true` when the failure is likely to go away on its own
    /// (connection loss, timeout). Retry helpers only retry these.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            return Self::Timeout { elapsed_ms: 0 };
        }
        if err.is_connection_dropped() || err.is_connection_refusal() || err.is_io_error() {
            return Self::connection_with_source("store connection failed", err);
        }
        match err.kind() {
            redis::ErrorKind::TypeError => Self::Serialization {
                message: "unexpected value type in store".to_owned(),
                source: Some(Arc::new(err)),
            },
            _ => Self::internal_with_source("store command failed", err),
        }
    }
}

impl From<deadpool_redis::PoolError> for StoreError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        match err {
            deadpool_redis::PoolError::Timeout(_) => Self::Timeout { elapsed_ms: 0 },
            other => Self::connection_with_source("store pool unavailable", other),
        }
    }
}

/// Validation error returned by configuration builders.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// A numeric or duration field is below its allowed minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// Name of the offending field.
        field: &'static str,
        /// The rejected value, rendered for display.
        value: String,
        /// The minimum accepted value, rendered for display.
        min: String,
    },

    /// A numeric field is above its allowed maximum.
    #[error("{field} must be at most {max}, got {value}")]
    AboveMaximum {
        /// Name of the offending field.
        field: &'static str,
        /// The rejected value, rendered for display.
        value: String,
        /// The maximum accepted value, rendered for display.
        max: String,
    },

    /// A field holds a value that cannot be parsed or is otherwise invalid.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}
