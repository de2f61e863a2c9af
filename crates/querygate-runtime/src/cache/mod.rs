//! Query result caching
//!
//! - [`CacheBackend`]: pluggable key/value store with TTLs and pattern invalidation
//! - [`NoOpCache`], [`MemoryCache`] and (feature `redis`) [`RedisCache`] backends
//! - [`CachedDataSource`]: cache-aside decorator over any data source
//!
//! Keys have the shape `query:{SOURCE_TYPE}:{sha256}`, or
//! `query:{SOURCE_TYPE}:{source}:{sha256}` for a named source, so one source
//! or a whole source type can be invalidated by pattern.

mod cached;
mod memory;
mod metrics;
mod noop;
#[cfg(feature = "redis")]
mod redis;

pub use cached::CachedDataSource;
pub use memory::MemoryCache;
pub use metrics::{CacheMetrics, CacheMetricsSnapshot};
pub use noop::NoOpCache;
#[cfg(feature = "redis")]
pub use self::redis::RedisCache;

use crate::datasource::SourceType;
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Default TTL for cached query results
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Key/value store used by the cache decorator
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch a value; `None` on miss or expiry
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Remove every key matching a glob pattern (`*` wildcard)
    async fn invalidate(&self, pattern: &str) -> Result<()>;

    /// Backend-specific statistics
    async fn stats(&self) -> Result<serde_json::Map<String, serde_json::Value>>;

    async fn close(&self) -> Result<()>;

    /// Deterministic key for a query against a source type
    fn generate_key(&self, source_type: SourceType, query: &str) -> String {
        generate_key(source_type, query)
    }
}

/// `query:{SOURCE_TYPE}:{sha256 hex of source type and query}`
pub fn generate_key(source_type: SourceType, query: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_type.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(query.as_bytes());
    format!("query:{}:{:x}", source_type, hasher.finalize())
}

/// Pattern matching every key of one source type
pub fn source_pattern(source_type: SourceType) -> String {
    format!("query:{}:*", source_type)
}

/// Key scoped to one named source: `query:{SOURCE_TYPE}:{scope}:{sha256}`.
///
/// Sources of the same type share the `query:{SOURCE_TYPE}:` prefix but
/// never each other's entries.
pub fn scoped_key(source_type: SourceType, scope: &str, query: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_type.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(scope.as_bytes());
    hasher.update(b"\n");
    hasher.update(query.as_bytes());
    format!("query:{}:{}:{:x}", source_type, scope, hasher.finalize())
}

/// Pattern matching every key of one named source
pub fn scoped_pattern(source_type: SourceType, scope: &str) -> String {
    format!("query:{}:{}:*", source_type, scope)
}

/// Compile a glob (`*` any run, `?` one character) into an anchored regex
pub(crate) fn glob_regex(pattern: &str) -> Result<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push_str("(?s)^");
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    expr.push('$');
    Regex::new(&expr)
        .map_err(|e| GatewayError::Cache(format!("invalid pattern '{}': {}", pattern, e)))
}
