//! Cache backend that stores nothing

use super::CacheBackend;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

/// Every lookup misses; writes are discarded
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpCache;

impl NoOpCache {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CacheBackend for NoOpCache {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    async fn invalidate(&self, _pattern: &str) -> Result<()> {
        Ok(())
    }

    async fn stats(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        let mut stats = serde_json::Map::new();
        stats.insert("type".to_string(), json!("noop"));
        stats.insert("connected".to_string(), json!(false));
        Ok(stats)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
