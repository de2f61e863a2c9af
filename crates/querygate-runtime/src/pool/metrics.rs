//! Pool counters
//!
//! Counters live inside the pool state and share its lock, so a snapshot is
//! always consistent with the connection list it was taken from.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default)]
pub(crate) struct PoolCounters {
    pub total_connections: u64,
    pub failed_connections: u64,
    pub total_requests: u64,
    pub pool_exhausted: u64,
    pub health_check_failures: u64,
    pub evicted_connections: u64,
}

/// Point-in-time view of a pool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolMetricsSnapshot {
    /// Connections created over the pool's lifetime
    pub total_connections: u64,
    /// Connections currently lent to callers
    pub active_connections: usize,
    /// Connections currently idle
    pub idle_connections: usize,
    /// Live connections (idle, in use, or being checked)
    pub pool_size: usize,
    pub failed_connections: u64,
    pub total_requests: u64,
    pub pool_exhausted: u64,
    pub health_check_failures: u64,
    pub evicted_connections: u64,
    pub max_connections: usize,
    pub min_connections: usize,
    pub closed: bool,
}
