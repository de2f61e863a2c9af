//! Named data source lookup

use super::config::DataSourceConfig;
use super::DataSource;
use crate::cache::{CacheBackend, CacheMetricsSnapshot, CachedDataSource};
use crate::error::{GatewayError, Result};
use crate::pool::PoolMetricsSnapshot;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

struct RegisteredSource {
    source: Arc<dyn DataSource>,
    cached: Option<Arc<CachedDataSource>>,
}

/// Maps request-facing names to data sources
#[derive(Default)]
pub struct DataSourceRegistry {
    sources: HashMap<String, RegisteredSource>,
}

impl DataSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every configured source, wrapping cache-enabled ones with `cache`.
    ///
    /// Any construction failure aborts: a gateway with a half-built registry
    /// would silently answer "unknown data source".
    pub async fn from_configs(
        configs: &HashMap<String, DataSourceConfig>,
        cache: Arc<dyn CacheBackend>,
        default_ttl: Duration,
    ) -> Result<Self> {
        let mut registry = Self::new();

        for (name, config) in configs {
            let source = config.build().await.map_err(|e| match e {
                GatewayError::InvalidConfig(msg) => {
                    GatewayError::InvalidConfig(format!("data source '{}': {}", name, msg))
                }
                other => other,
            })?;

            if config.cache_enabled {
                let cached = CachedDataSource::new(source, Arc::clone(&cache))
                    .with_default_ttl(default_ttl)
                    .with_scope(name.clone());
                registry.register_cached(name.clone(), Arc::new(cached));
            } else {
                registry.register(name.clone(), source);
            }
            info!(
                "Registered data source '{}' (cache {})",
                name,
                if config.cache_enabled { "on" } else { "off" }
            );
        }

        Ok(registry)
    }

    pub fn register(&mut self, name: impl Into<String>, source: Arc<dyn DataSource>) {
        self.sources.insert(
            name.into(),
            RegisteredSource {
                source,
                cached: None,
            },
        );
    }

    pub fn register_cached(&mut self, name: impl Into<String>, cached: Arc<CachedDataSource>) {
        let source: Arc<dyn DataSource> = cached.clone();
        self.sources.insert(
            name.into(),
            RegisteredSource {
                source,
                cached: Some(cached),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DataSource>> {
        self.sources.get(name).map(|s| Arc::clone(&s.source))
    }

    /// Like [`get`](Self::get), failing with `UnknownDataSource`
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn DataSource>> {
        self.get(name)
            .ok_or_else(|| GatewayError::UnknownDataSource(name.to_string()))
    }

    pub fn cached(&self, name: &str) -> Option<Arc<CachedDataSource>> {
        self.sources.get(name).and_then(|s| s.cached.clone())
    }

    /// Source names in sorted order
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn pool_metrics(&self) -> BTreeMap<String, PoolMetricsSnapshot> {
        self.sources
            .iter()
            .filter_map(|(name, s)| s.source.pool_metrics().map(|m| (name.clone(), m)))
            .collect()
    }

    pub fn cache_metrics(&self) -> BTreeMap<String, CacheMetricsSnapshot> {
        self.sources
            .iter()
            .filter_map(|(name, s)| s.cached.as_ref().map(|c| (name.clone(), c.metrics())))
            .collect()
    }

    pub fn reset_cache_metrics(&self) {
        for cached in self.sources.values().filter_map(|s| s.cached.as_ref()) {
            cached.reset_metrics();
        }
    }

    /// Invalidate cached results for one source, or for every cached source.
    ///
    /// Returns the names that were invalidated.
    pub async fn invalidate(&self, name: Option<&str>) -> Result<Vec<String>> {
        let targets: Vec<(String, Arc<CachedDataSource>)> = match name {
            Some(name) => {
                let entry = self
                    .sources
                    .get(name)
                    .ok_or_else(|| GatewayError::UnknownDataSource(name.to_string()))?;
                entry
                    .cached
                    .clone()
                    .map(|c| vec![(name.to_string(), c)])
                    .unwrap_or_default()
            }
            None => self
                .sources
                .iter()
                .filter_map(|(n, s)| s.cached.clone().map(|c| (n.clone(), c)))
                .collect(),
        };

        let mut invalidated = Vec::with_capacity(targets.len());
        for (name, cached) in targets {
            cached.invalidate_cache().await?;
            invalidated.push(name);
        }
        invalidated.sort();
        Ok(invalidated)
    }

    pub async fn close_all(&self) {
        for (name, entry) in &self.sources {
            if let Err(err) = entry.source.close().await {
                warn!("Failed to close data source '{}': {}", name, err);
            }
        }
    }
}
