//! Process-local cache backend
//!
//! Entries carry their own TTL and are dropped lazily on read or by
//! [`MemoryCache::cleanup`].

use super::{glob_regex, CacheBackend};
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cached payload with its expiry
#[derive(Debug, Clone)]
struct CachedEntry {
    value: String,
    cached_at: Instant,
    ttl: Duration,
}

impl CachedEntry {
    fn new(value: String, ttl: Duration) -> Self {
        Self {
            value,
            cached_at: Instant::now(),
            ttl,
        }
    }

    fn is_valid(&self) -> bool {
        self.cached_at.elapsed() < self.ttl
    }

    fn remaining_ttl(&self) -> Option<Duration> {
        self.ttl.checked_sub(self.cached_at.elapsed())
    }
}

/// In-memory cache backend
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CachedEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove expired entries, returning how many were dropped
    pub fn cleanup(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_valid());
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Remaining lifetime of a live entry
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.entries.read().get(key).and_then(CachedEntry::remaining_ttl)
    }

    /// Run [`cleanup`](Self::cleanup) every `period` until `shutdown` fires.
    pub fn spawn_cleanup(
        cache: &Arc<Self>,
        period: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = Arc::downgrade(cache);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(cache) = cache.upgrade() else { break };
                        let removed = cache.cleanup();
                        if removed > 0 {
                            tracing::debug!("Memory cache cleanup removed {} expired entries", removed);
                        }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read();
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_valid())
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries
            .write()
            .insert(key.to_string(), CachedEntry::new(value.to_string(), ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn invalidate(&self, pattern: &str) -> Result<()> {
        let matcher = glob_regex(pattern)?;
        self.entries.write().retain(|key, _| !matcher.is_match(key));
        Ok(())
    }

    async fn stats(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        let entries = self.entries.read();
        let live = entries.values().filter(|e| e.is_valid()).count();

        let mut stats = serde_json::Map::new();
        stats.insert("type".to_string(), json!("memory"));
        stats.insert("connected".to_string(), json!(true));
        stats.insert("keys".to_string(), json!(live));
        stats.insert("expired_pending".to_string(), json!(entries.len() - live));
        Ok(stats)
    }

    async fn close(&self) -> Result<()> {
        self.entries.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip() {
        let cache = MemoryCache::new();
        cache.set("k", "payload", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("payload"));
        assert!(cache.ttl("k").unwrap() <= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = MemoryCache::new();
        cache.set("k", "payload", Duration::from_secs(5)).await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert_eq!(cache.len(), 1);

        assert_eq!(cache.cleanup(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_by_pattern() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache.set("query:COLUMNAR:a", "1", ttl).await.unwrap();
        cache.set("query:COLUMNAR:b", "2", ttl).await.unwrap();
        cache.set("query:WAREHOUSE:a", "3", ttl).await.unwrap();

        cache.invalidate("query:COLUMNAR:*").await.unwrap();

        assert_eq!(cache.get("query:COLUMNAR:a").await.unwrap(), None);
        assert_eq!(cache.get("query:WAREHOUSE:a").await.unwrap().as_deref(), Some("3"));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_and_stats() {
        let cache = MemoryCache::new();
        cache.set("k", "v", Duration::from_secs(60)).await.unwrap();
        cache.delete("k").await.unwrap();

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats["type"], "memory");
        assert_eq!(stats["keys"], 0);
    }
}
