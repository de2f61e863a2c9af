//! Gateway initialization
//!
//! Turns a [`ServerConfig`] into the shared [`AppState`]: builds the cache
//! backend, then every configured data source behind it.

use crate::api::AppState;
use crate::config::{CacheBackendKind, CacheSettings, ServerConfig};
use anyhow::{Context, Result};
use querygate_runtime::cache::{CacheBackend, MemoryCache, NoOpCache};
use querygate_runtime::datasource::DataSourceRegistry;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Initialize the gateway.
///
/// Any data source that cannot be built (bad pool bounds, missing
/// credentials) aborts start-up. Background tasks stop when `shutdown` fires.
pub async fn init_gateway(config: &ServerConfig, shutdown: CancellationToken) -> Result<AppState> {
    let cache = init_cache(&config.cache, shutdown).await?;

    let registry = DataSourceRegistry::from_configs(
        &config.datasources,
        Arc::clone(&cache),
        config.cache.default_ttl(),
    )
    .await
    .context("Failed to initialize data sources")?;
    info!(
        "Gateway initialized with {} data sources: {:?}",
        registry.len(),
        registry.names()
    );

    Ok(AppState::new(Arc::new(registry))
        .with_cache(config.cache.backend, cache)
        .with_query_timeout(config.query_timeout())
        .with_stream_buffer(config.stream_buffer))
}

async fn init_cache(
    settings: &CacheSettings,
    shutdown: CancellationToken,
) -> Result<Arc<dyn CacheBackend>> {
    match settings.backend {
        CacheBackendKind::None => {
            info!("Result cache disabled");
            Ok(Arc::new(NoOpCache::new()))
        }
        CacheBackendKind::Memory => {
            let cache = Arc::new(MemoryCache::new());
            MemoryCache::spawn_cleanup(&cache, settings.cleanup_interval(), shutdown);
            info!(
                "Using in-memory result cache (default TTL {}s)",
                settings.default_ttl_secs
            );
            Ok(cache as Arc<dyn CacheBackend>)
        }
        CacheBackendKind::Redis => init_redis(settings).await,
    }
}

#[cfg(feature = "redis")]
async fn init_redis(settings: &CacheSettings) -> Result<Arc<dyn CacheBackend>> {
    let url = settings
        .redis_url
        .as_deref()
        .context("cache.redis_url is required for the redis backend")?;
    let cache = querygate_runtime::cache::RedisCache::connect(url)
        .await
        .context("Failed to connect to Redis")?;
    info!("Using Redis result cache");
    Ok(Arc::new(cache))
}

#[cfg(not(feature = "redis"))]
async fn init_redis(_settings: &CacheSettings) -> Result<Arc<dyn CacheBackend>> {
    anyhow::bail!("the redis cache backend requires building with the `redis` feature")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_config_builds_empty_gateway() {
        let state = init_gateway(&ServerConfig::default(), CancellationToken::new())
            .await
            .unwrap();
        assert!(state.registry.is_empty());
        assert_eq!(state.cache_backend, CacheBackendKind::Memory);
    }

    #[tokio::test]
    async fn test_bad_source_aborts_startup() {
        let yaml = r#"
datasources:
  dwh:
    type: warehouse
    project_id: acme
"#;
        let config: ServerConfig = serde_yaml::from_str(yaml).unwrap();
        let err = init_gateway(&config, CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(format!("{:#}", err).contains("dwh"));
    }

    #[cfg(not(feature = "redis"))]
    #[tokio::test]
    async fn test_redis_backend_requires_feature() {
        let mut config = ServerConfig::default();
        config.cache.backend = CacheBackendKind::Redis;
        assert!(init_gateway(&config, CancellationToken::new()).await.is_err());
    }
}
