//! Cache-aside decorator for data sources
//!
//! Lookups go to the cache first; misses fall through to the wrapped source
//! and non-empty results are written back. The cache can only make a query
//! faster: any cache failure is counted, logged and treated as a miss.

use super::metrics::{CacheMetrics, CacheMetricsSnapshot};
use super::{scoped_key, scoped_pattern, source_pattern, CacheBackend, DEFAULT_TTL};
use crate::datasource::{DataSource, QueryOptions, QueryResult, SourceType};
use crate::error::Result;
use crate::pool::PoolMetricsSnapshot;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use querygate_core::{Row, Value};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Wire form of a cached result
#[derive(Debug, Serialize, Deserialize)]
struct CachedPayload {
    data: Vec<IndexMap<String, CachedCell>>,
    count: usize,
    source: SourceType,
}

/// Cell encoding that keeps the variant, so strings that look like
/// timestamps come back as strings
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
enum CachedCell {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    String(String),
    Array(Vec<CachedCell>),
    Object(IndexMap<String, CachedCell>),
}

impl From<&Value> for CachedCell {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => CachedCell::Null,
            Value::Bool(b) => CachedCell::Bool(*b),
            Value::Integer(i) => CachedCell::Integer(*i),
            Value::Float(f) => CachedCell::Float(*f),
            Value::Timestamp(ts) => CachedCell::Timestamp(*ts),
            Value::String(s) => CachedCell::String(s.clone()),
            Value::Array(items) => CachedCell::Array(items.iter().map(CachedCell::from).collect()),
            Value::Object(row) => CachedCell::Object(encode_row(row)),
        }
    }
}

impl From<CachedCell> for Value {
    fn from(cell: CachedCell) -> Self {
        match cell {
            CachedCell::Null => Value::Null,
            CachedCell::Bool(b) => Value::Bool(b),
            CachedCell::Integer(i) => Value::Integer(i),
            CachedCell::Float(f) => Value::Float(f),
            CachedCell::Timestamp(ts) => Value::Timestamp(ts),
            CachedCell::String(s) => Value::String(s),
            CachedCell::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            CachedCell::Object(fields) => Value::Object(decode_row(fields)),
        }
    }
}

fn encode_row(row: &Row) -> IndexMap<String, CachedCell> {
    row.iter()
        .map(|(column, value)| (column.clone(), CachedCell::from(value)))
        .collect()
}

fn decode_row(fields: IndexMap<String, CachedCell>) -> Row {
    fields
        .into_iter()
        .map(|(column, cell)| (column, Value::from(cell)))
        .collect()
}

/// Wraps a data source with a cache backend
pub struct CachedDataSource {
    inner: Arc<dyn DataSource>,
    cache: Arc<dyn CacheBackend>,
    metrics: CacheMetrics,
    default_ttl: Duration,
    /// Registry name folded into keys; unscoped entries are shared per source type
    scope: Option<String>,
}

impl CachedDataSource {
    pub fn new(inner: Arc<dyn DataSource>, cache: Arc<dyn CacheBackend>) -> Self {
        Self {
            inner,
            cache,
            metrics: CacheMetrics::new(),
            default_ttl: DEFAULT_TTL,
            scope: None,
        }
    }

    /// Keep this source's entries apart from other sources of the same type
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn inner(&self) -> &Arc<dyn DataSource> {
        &self.inner
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    /// Drop every cached result for this source (for its whole type when unscoped)
    pub async fn invalidate_cache(&self) -> Result<()> {
        let source_type = self.inner.source_type();
        let pattern = match &self.scope {
            Some(scope) => scoped_pattern(source_type, scope),
            None => source_pattern(source_type),
        };
        match self.cache.invalidate(&pattern).await {
            Ok(()) => {
                self.metrics.record_delete();
                debug!("Invalidated cache entries matching {}", pattern);
                Ok(())
            }
            Err(err) => {
                self.metrics.record_error();
                warn!("Cache invalidation failed for {}: {}", pattern, err);
                Err(err)
            }
        }
    }

    /// Cache key for `query` run with `opts`
    pub fn cache_key(&self, query: &str, opts: &QueryOptions) -> String {
        let material = format!("{}\u{1f}{}", query, opts.cache_signature());
        match &self.scope {
            Some(scope) => scoped_key(self.inner.source_type(), scope, &material),
            None => self.cache.generate_key(self.inner.source_type(), &material),
        }
    }

    async fn lookup(&self, key: &str) -> Option<QueryResult> {
        match self.cache.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str::<CachedPayload>(&raw) {
                Ok(payload) => Some(QueryResult {
                    rows: payload.data.into_iter().map(decode_row).collect(),
                    count: payload.count,
                    source: payload.source,
                    cache_hit: true,
                    query_time_ms: 0,
                }),
                Err(err) => {
                    self.metrics.record_error();
                    warn!("Discarding undecodable cache entry {}: {}", key, err);
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                self.metrics.record_error();
                warn!("Cache lookup failed for {}: {}", key, err);
                None
            }
        }
    }

    async fn store(&self, key: &str, result: &QueryResult, opts: &QueryOptions) {
        let payload = CachedPayload {
            data: result.rows.iter().map(encode_row).collect(),
            count: result.count,
            source: result.source,
        };
        let ttl = opts.cache_ttl().unwrap_or(self.default_ttl);

        let stored = match serde_json::to_string(&payload) {
            Ok(raw) => self.cache.set(key, &raw, ttl).await,
            Err(err) => Err(err.into()),
        };

        match stored {
            Ok(()) => self.metrics.record_set(),
            Err(err) => {
                self.metrics.record_error();
                warn!("Failed to cache result for {}: {}", key, err);
            }
        }
    }
}

#[async_trait]
impl DataSource for CachedDataSource {
    async fn execute_query(&self, query: &str, opts: &QueryOptions) -> Result<QueryResult> {
        let started = Instant::now();
        let key = self.cache_key(query, opts);

        if let Some(hit) = self.lookup(&key).await {
            let elapsed = started.elapsed();
            self.metrics.record_hit(elapsed);
            debug!("Cache hit for {} ({} rows)", key, hit.count);
            return Ok(hit.with_query_time(elapsed));
        }
        self.metrics.record_miss(started.elapsed());

        let result = match self.inner.execute_query(query, opts).await {
            Ok(result) => result,
            Err(err) => {
                self.metrics.record_error();
                return Err(err);
            }
        };

        if !result.is_empty() {
            self.store(&key, &result, opts).await;
        }
        Ok(result)
    }

    async fn get_data(&self, table: &str, opts: &QueryOptions) -> Result<QueryResult> {
        self.inner.get_data(table, opts).await
    }

    async fn test_connection(&self) -> Result<()> {
        self.inner.test_connection().await
    }

    fn source_type(&self) -> SourceType {
        self.inner.source_type()
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    fn pool_metrics(&self) -> Option<PoolMetricsSnapshot> {
        self.inner.pool_metrics()
    }
}
