//! Gateway error types

use thiserror::Error;

/// Gateway runtime error
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Invalid configuration, fatal at construction time
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The connection pool has been closed
    #[error("Connection pool is closed")]
    PoolClosed,

    /// Every connection is in use and the pool is at capacity
    #[error("Connection pool exhausted (max {max} connections)")]
    PoolExhausted { max: usize },

    /// Dialing or authenticating against a backend failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// An operation exceeded its time budget
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The backend rejected or failed a query
    #[error("Query error: {0}")]
    Query(String),

    /// Cache backend failure
    #[error("Cache error: {0}")]
    Cache(String),

    /// A request named a data source that is not configured
    #[error("Unknown data source: {0}")]
    UnknownDataSource(String),

    /// Malformed or out-of-range request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The consumer of a stream went away
    #[error("Stream closed by consumer")]
    StreamClosed,

    /// Request was cancelled
    #[error("Context cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl GatewayError {
    /// Whether the failure is a transient resource problem rather than a bad query
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::PoolExhausted { .. }
                | GatewayError::ConnectionFailed(_)
                | GatewayError::Timeout(_)
                | GatewayError::Http(_)
        )
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for GatewayError {
    fn from(err: redis::RedisError) -> Self {
        GatewayError::Cache(err.to_string())
    }
}

impl From<csv::Error> for GatewayError {
    fn from(err: csv::Error) -> Self {
        GatewayError::Query(format!("CSV encoding failed: {}", err))
    }
}

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
