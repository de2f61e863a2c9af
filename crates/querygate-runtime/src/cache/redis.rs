//! Redis cache backend

use super::CacheBackend;
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

const SCAN_BATCH: usize = 100;

/// Shared cache backed by Redis
pub struct RedisCache {
    conn: ConnectionManager,
    url: String,
}

impl RedisCache {
    /// Connect and verify the server answers `PING`
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| GatewayError::InvalidConfig(format!("invalid Redis URL: {}", e)))?;
        let mut conn = ConnectionManager::new(client)
            .await
            .map_err(|e| GatewayError::ConnectionFailed(format!("Redis connection failed: {}", e)))?;

        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("Connected to Redis cache at {}", redact(url));

        Ok(Self {
            conn,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL").arg(key).query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn invalidate(&self, pattern: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut removed = 0usize;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                removed += keys.len();
                redis::cmd("DEL")
                    .arg(&keys)
                    .query_async::<_, ()>(&mut conn)
                    .await?;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!("Invalidated {} Redis keys matching {}", removed, pattern);
        Ok(())
    }

    async fn stats(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        let mut conn = self.conn.clone();
        let keys: u64 = redis::cmd("DBSIZE").query_async(&mut conn).await?;
        let info: String = redis::cmd("INFO").arg("stats").query_async(&mut conn).await?;

        let mut stats = serde_json::Map::new();
        stats.insert("type".to_string(), json!("redis"));
        stats.insert("connected".to_string(), json!(true));
        stats.insert("address".to_string(), json!(redact(&self.url)));
        stats.insert("keys".to_string(), json!(keys));
        for field in ["keyspace_hits", "keyspace_misses", "expired_keys", "evicted_keys"] {
            if let Some(value) = info_field(&info, field) {
                stats.insert(field.to_string(), json!(value));
            }
        }
        Ok(stats)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

fn info_field(info: &str, name: &str) -> Option<u64> {
    info.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| *key == name)
        .and_then(|(_, value)| value.trim().parse().ok())
}

/// Strip credentials from a Redis URL before logging it
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}***{}", &url[..scheme_end + 3], &url[at..])
        }
        _ => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_field() {
        let info = "# Stats\r\nkeyspace_hits:12\r\nkeyspace_misses:3\r\n";
        assert_eq!(info_field(info, "keyspace_hits"), Some(12));
        assert_eq!(info_field(info, "keyspace_misses"), Some(3));
        assert_eq!(info_field(info, "evicted_keys"), None);
    }

    #[test]
    fn test_redact() {
        assert_eq!(redact("redis://:secret@cache:6379/0"), "redis://***@cache:6379/0");
        assert_eq!(redact("redis://cache:6379"), "redis://cache:6379");
    }
}
