//! Bounded connection pool
//!
//! The pool owns connection lifecycle (creation, lending, health checks,
//! idle eviction and shutdown). The wire protocol belongs to a [`Connector`]
//! supplied by the backend adapter.
//!
//! Acquisition never waits for capacity: when every connection is in use and
//! the pool is at `max_connections`, `acquire` fails with
//! [`GatewayError::PoolExhausted`](crate::error::GatewayError::PoolExhausted)
//! and the caller decides whether to retry.

mod config;
mod connection_pool;
mod metrics;

pub use config::PoolConfig;
pub use connection_pool::{ConnectionPool, ConnectionState, PooledConnection};
pub use metrics::PoolMetricsSnapshot;

pub(crate) use config::{duration_millis, duration_secs};

use crate::error::Result;
use async_trait::async_trait;

/// Dials, checks and closes connections for one backend
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connection handle lent to callers
    type Connection: Send + Sync + 'static;

    /// Open and authenticate a new connection
    async fn connect(&self) -> Result<Self::Connection>;

    /// Cheap liveness probe
    async fn ping(&self, conn: &Self::Connection) -> Result<()>;

    /// Release backend resources held by a connection
    fn close(&self, _conn: &Self::Connection) {}

    /// Human-readable target, used in logs
    fn describe(&self) -> String;
}
