//! Error types for cache operations.
//!
//! Errors raised on the read path (`get_or_add`) propagate to the caller.
//! Errors raised while invalidating are logged where they happen and never
//! surface through this type.

use std::fmt;

/// Boxed error produced by a caller-supplied value producer.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur during cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A remote store command (GET/SET/DEL/PUBLISH) failed.
    #[error("Store error: {message}")]
    Store {
        /// Description of the failed command.
        message: String,
    },

    /// Could not obtain a connection to the remote store.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection failure.
        message: String,
    },

    /// Subscribing to the invalidation channel failed.
    #[error("Subscribe error: {message}")]
    Subscribe {
        /// Description of the subscription failure.
        message: String,
    },

    /// The value producer failed; nothing was cached.
    #[error("Producer failed: {0}")]
    Producer(#[source] BoxError),

    /// The value collides with one of the reserved sentinel tokens.
    #[error("Value is a reserved sentinel token: {value}")]
    ReservedValue {
        /// The offending value.
        value: String,
    },

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration problem.
        message: String,
    },
}

impl CacheError {
    /// Creates a new `Store` error.
    #[must_use]
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Creates a new `Connection` error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a new `Subscribe` error.
    #[must_use]
    pub fn subscribe(message: impl Into<String>) -> Self {
        Self::Subscribe {
            message: message.into(),
        }
    }

    /// Wraps a producer failure.
    #[must_use]
    pub fn producer(source: impl Into<BoxError>) -> Self {
        Self::Producer(source.into())
    }

    /// Creates a new `ReservedValue` error.
    #[must_use]
    pub fn reserved_value(value: impl Into<String>) -> Self {
        Self::ReservedValue {
            value: value.into(),
        }
    }

    /// Creates a new `Config` error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns `true` if the producer failed.
    #[must_use]
    pub fn is_producer(&self) -> bool {
        matches!(self, Self::Producer(_))
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Store { .. } => ErrorCategory::Store,
            Self::Connection { .. } | Self::Subscribe { .. } => ErrorCategory::Infrastructure,
            Self::Producer(_) => ErrorCategory::Producer,
            Self::ReservedValue { .. } | Self::Config { .. } => ErrorCategory::Validation,
        }
    }
}

impl From<deadpool_redis::redis::RedisError> for CacheError {
    fn from(err: deadpool_redis::redis::RedisError) -> Self {
        if err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() {
            Self::connection(err.to_string())
        } else {
            Self::store(err.to_string())
        }
    }
}

impl From<deadpool_redis::PoolError> for CacheError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::connection(format!("failed to get Redis connection: {err}"))
    }
}

/// Categories of cache errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Remote store command failed.
    Store,
    /// Caller's producer failed.
    Producer,
    /// Invalid value or configuration.
    Validation,
    /// Connection or subscription failure.
    Infrastructure,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store => write!(f, "store"),
            Self::Producer => write!(f, "producer"),
            Self::Validation => write!(f, "validation"),
            Self::Infrastructure => write!(f, "infrastructure"),
        }
    }
}

/// Type alias for a cache result.
pub type CacheResult<T> = Result<T, CacheError>;
