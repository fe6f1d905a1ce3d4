//! Error types for Tripwire

use thiserror::Error;

/// Result type alias using Tripwire's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Tripwire operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Redis error
    #[error("Redis error: {0}")]
    Redis(String),

    /// Repository failure that is not tied to a specific driver
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error (missing or invalid threshold, bad config file)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The metric feed could not produce a value for an alert
    #[error("Metric unavailable for alert {alert_id}: {reason}")]
    MetricUnavailable {
        /// Alert the metric was requested for
        alert_id: String,
        /// Why the feed failed
        reason: String,
    },

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found error
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record
        entity: String,
        /// Requested id
        id: String,
    },

    /// A cycle was started while another one was still running
    #[error("An evaluation cycle is already running")]
    CycleInProgress,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a not found error
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a metric-unavailable error
    pub fn metric_unavailable(alert_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MetricUnavailable {
            alert_id: alert_id.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error originates in the persistence layer
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::Redis(_) | Self::Storage(_) | Self::NotFound { .. }
        )
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Self::Redis(err.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
