//! Connection pool configuration

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Pool sizing and timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Upper bound on live connections, including ones being dialed
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Connections kept open even when idle
    #[serde(default = "default_min_connections")]
    pub min_connections: usize,

    /// Idle time after which a connection may be evicted
    #[serde(
        default = "default_max_idle_time",
        rename = "max_idle_time_secs",
        with = "duration_secs"
    )]
    pub max_idle_time: Duration,

    /// Bound on dialing a new connection
    #[serde(
        default = "default_connection_timeout",
        rename = "connection_timeout_ms",
        with = "duration_millis"
    )]
    pub connection_timeout: Duration,

    /// Period of the idle-connection health check
    #[serde(
        default = "default_health_check_interval",
        rename = "health_check_interval_secs",
        with = "duration_secs"
    )]
    pub health_check_interval: Duration,

    /// Period of the idle eviction sweep
    #[serde(
        default = "default_eviction_interval",
        rename = "eviction_interval_secs",
        with = "duration_secs"
    )]
    pub eviction_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            max_idle_time: default_max_idle_time(),
            connection_timeout: default_connection_timeout(),
            health_check_interval: default_health_check_interval(),
            eviction_interval: default_eviction_interval(),
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(GatewayError::InvalidConfig(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(GatewayError::InvalidConfig(format!(
                "min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        for (name, value) in [
            ("connection_timeout", self.connection_timeout),
            ("health_check_interval", self.health_check_interval),
            ("eviction_interval", self.eviction_interval),
        ] {
            if value.is_zero() {
                return Err(GatewayError::InvalidConfig(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        Ok(())
    }
}

fn default_max_connections() -> usize {
    10
}

fn default_min_connections() -> usize {
    2
}

fn default_max_idle_time() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_connection_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_health_check_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_eviction_interval() -> Duration {
    Duration::from_secs(60)
}

pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
