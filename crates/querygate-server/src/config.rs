//! Server configuration

use querygate_runtime::datasource::DataSourceConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,

    /// One JSON object per line
    Json,
}

/// Which cache backend sits behind cache-enabled sources
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    /// Caching disabled
    None,

    /// In-process cache with TTL
    #[default]
    Memory,

    /// Shared Redis cache (requires the `redis` feature)
    Redis,
}

impl CacheBackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheBackendKind::None => "none",
            CacheBackendKind::Memory => "memory",
            CacheBackendKind::Redis => "redis",
        }
    }
}

/// Result cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default)]
    pub backend: CacheBackendKind,

    /// Redis connection URL, e.g. `redis://localhost:6379/0`
    #[serde(default)]
    pub redis_url: Option<String>,

    /// TTL for entries when a request sets none
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Sweep period for the memory backend
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::default(),
            redis_url: None,
            default_ttl_secs: default_ttl_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl CacheSettings {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port (HTTP)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level, used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Default timeout for `/query` requests
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Frames buffered between a stream producer and the response body
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,

    #[serde(default)]
    pub cache: CacheSettings,

    /// Data sources by name
    #[serde(default)]
    pub datasources: HashMap<String, DataSourceConfig>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_query_timeout_ms() -> u64 {
    30_000
}

fn default_stream_buffer() -> usize {
    16
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            query_timeout_ms: default_query_timeout_ms(),
            stream_buffer: default_stream_buffer(),
            cache: CacheSettings::default(),
            datasources: HashMap::new(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from `.env`, `config/gateway.*` and `QUERYGATE__*` variables
    pub fn load() -> anyhow::Result<Self> {
        // Load .env file if exists
        dotenvy::dotenv().ok();

        let config_result = config::Config::builder()
            .add_source(config::File::with_name("config/gateway").required(false))
            .add_source(
                config::Environment::with_prefix("QUERYGATE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build();

        match config_result {
            Ok(cfg) => cfg
                .try_deserialize()
                .map_err(|e| anyhow::anyhow!("Failed to deserialize config: {}", e)),
            Err(err) => {
                tracing::info!("No usable config source ({}), using default configuration", err);
                Ok(Self::default())
            }
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}
