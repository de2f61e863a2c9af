//! Cache keys and the cache-aside decorator

mod common;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use common::PagedSource;
use querygate_core::{Row, Value};
use querygate_runtime::cache::{generate_key, CacheBackend, CachedDataSource, MemoryCache};
use querygate_runtime::datasource::{
    DataSource, DataSourceRegistry, QueryOptions, QueryResult, SourceType,
};
use querygate_runtime::error::Result;
use std::sync::Arc;
use std::time::Duration;

/// Always returns the same rows
struct FixedSource {
    rows: Vec<Row>,
}

impl FixedSource {
    fn single(column: &str, value: Value) -> Arc<Self> {
        let mut row = Row::new();
        row.insert(column.to_string(), value);
        Arc::new(Self { rows: vec![row] })
    }
}

#[async_trait]
impl DataSource for FixedSource {
    async fn execute_query(&self, _query: &str, _opts: &QueryOptions) -> Result<QueryResult> {
        Ok(QueryResult::new(self.rows.clone(), SourceType::Columnar))
    }

    async fn get_data(&self, _table: &str, _opts: &QueryOptions) -> Result<QueryResult> {
        Ok(QueryResult::new(self.rows.clone(), SourceType::Columnar))
    }

    async fn test_connection(&self) -> Result<()> {
        Ok(())
    }

    fn source_type(&self) -> SourceType {
        SourceType::Columnar
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[test]
fn test_keys_separate_sources_and_queries() {
    let a = generate_key(SourceType::Columnar, "SELECT 1");
    let b = generate_key(SourceType::Warehouse, "SELECT 1");
    let c = generate_key(SourceType::Columnar, "SELECT 2");

    assert_ne!(a, b);
    assert_ne!(a, c);
    assert_eq!(a, generate_key(SourceType::Columnar, "SELECT 1"));
    assert!(a.starts_with("query:COLUMNAR:"));
}

#[tokio::test(start_paused = true)]
async fn test_cached_result_expires_with_ttl() {
    let inner = PagedSource::new(3);
    let cache = Arc::new(MemoryCache::new());
    let cached = CachedDataSource::new(inner.clone(), cache.clone())
        .with_default_ttl(Duration::from_secs(60));
    let opts = QueryOptions::default();

    cached.execute_query("SELECT * FROM users", &opts).await.unwrap();
    let hit = cached.execute_query("SELECT * FROM users", &opts).await.unwrap();
    assert!(hit.cache_hit);
    assert_eq!(hit.count, 3);

    tokio::time::advance(Duration::from_secs(61)).await;
    let refreshed = cached.execute_query("SELECT * FROM users", &opts).await.unwrap();
    assert!(!refreshed.cache_hit);
    assert_eq!(inner.calls(), 2);
}

#[tokio::test]
async fn test_per_request_ttl_overrides_default() {
    let cache = Arc::new(MemoryCache::new());
    let cached = CachedDataSource::new(PagedSource::new(1), cache.clone());
    let opts = QueryOptions {
        cache_ttl_secs: Some(5),
        ..Default::default()
    };

    cached.execute_query("SELECT 1", &opts).await.unwrap();

    let key = generate_key(
        SourceType::Warehouse,
        &format!("SELECT 1\u{1f}{}", opts.cache_signature()),
    );
    let ttl = cache.ttl(&key).unwrap();
    assert!(ttl <= Duration::from_secs(5));
    assert!(cache.get(&key).await.unwrap().is_some());
}

#[tokio::test]
async fn test_backend_errors_are_not_cached() {
    let inner = PagedSource::new(2);
    let cached = CachedDataSource::new(inner.clone(), Arc::new(MemoryCache::new()));

    assert!(cached.execute_query("FAIL", &QueryOptions::default()).await.is_err());
    assert!(cached.execute_query("FAIL", &QueryOptions::default()).await.is_err());

    let metrics = cached.metrics();
    assert_eq!(metrics.sets, 0);
    assert_eq!(metrics.misses, 2);
    assert_eq!(inner.calls(), 2);
}

#[tokio::test]
async fn test_registry_reports_metrics_per_cached_source() {
    let cache: Arc<dyn CacheBackend> = Arc::new(MemoryCache::new());
    let mut registry = DataSourceRegistry::new();
    registry.register_cached(
        "dwh",
        Arc::new(CachedDataSource::new(PagedSource::new(4), Arc::clone(&cache))),
    );
    registry.register("raw", PagedSource::new(4));

    let dwh = registry.resolve("dwh").unwrap();
    dwh.execute_query("SELECT 1", &QueryOptions::default()).await.unwrap();
    dwh.execute_query("SELECT 1", &QueryOptions::default()).await.unwrap();

    let metrics = registry.cache_metrics();
    assert_eq!(metrics.len(), 1);
    assert_eq!(metrics["dwh"].hits, 1);
    assert_eq!(metrics["dwh"].hit_rate, 50.0);

    registry.reset_cache_metrics();
    assert_eq!(registry.cache_metrics()["dwh"].hits, 0);
}

#[tokio::test]
async fn test_hit_returns_the_rows_of_the_miss() {
    let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    let mut row = Row::new();
    row.insert(
        "offset_text".to_string(),
        Value::String("2024-01-02T03:04:05+07:00".to_string()),
    );
    row.insert("seen_at".to_string(), Value::Timestamp(ts));
    row.insert(
        "tags".to_string(),
        Value::Array(vec![Value::String("2024-05-05T00:00:00Z".to_string()), Value::Null]),
    );
    let cached = CachedDataSource::new(
        Arc::new(FixedSource { rows: vec![row] }),
        Arc::new(MemoryCache::new()),
    );
    let opts = QueryOptions::default();

    let miss = cached.execute_query("SELECT *", &opts).await.unwrap();
    let hit = cached.execute_query("SELECT *", &opts).await.unwrap();

    assert!(hit.cache_hit);
    assert_eq!(hit.rows, miss.rows);
    assert_eq!(
        serde_json::to_string(&hit.rows).unwrap(),
        serde_json::to_string(&miss.rows).unwrap()
    );
}

#[tokio::test]
async fn test_named_sources_of_one_type_do_not_share_entries() {
    let cache: Arc<dyn CacheBackend> = Arc::new(MemoryCache::new());
    let a = CachedDataSource::new(
        FixedSource::single("project", Value::from("project-a")),
        Arc::clone(&cache),
    )
    .with_scope("a");
    let b = CachedDataSource::new(
        FixedSource::single("project", Value::from("project-b")),
        Arc::clone(&cache),
    )
    .with_scope("b");
    let opts = QueryOptions::default();

    a.execute_query("SELECT project", &opts).await.unwrap();
    let from_b = b.execute_query("SELECT project", &opts).await.unwrap();
    assert!(!from_b.cache_hit);
    assert_eq!(from_b.rows[0]["project"], Value::from("project-b"));

    a.invalidate_cache().await.unwrap();
    let again = b.execute_query("SELECT project", &opts).await.unwrap();
    assert!(again.cache_hit, "invalidating one source leaves the other cached");
    assert!(!a.execute_query("SELECT project", &opts).await.unwrap().cache_hit);
}
