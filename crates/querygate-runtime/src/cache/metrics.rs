//! Cache hit/miss accounting

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Counters {
    hits: u64,
    misses: u64,
    sets: u64,
    deletes: u64,
    errors: u64,
    total_hit_time: Duration,
    total_miss_time: Duration,
    last_reset: DateTime<Utc>,
    started: Instant,
}

impl Counters {
    fn new() -> Self {
        Self {
            hits: 0,
            misses: 0,
            sets: 0,
            deletes: 0,
            errors: 0,
            total_hit_time: Duration::ZERO,
            total_miss_time: Duration::ZERO,
            last_reset: Utc::now(),
            started: Instant::now(),
        }
    }
}

/// Counters owned by one cache decorator
#[derive(Debug)]
pub struct CacheMetrics {
    inner: Mutex<Counters>,
}

/// Serializable view of [`CacheMetrics`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
    /// Hits as a percentage of lookups
    pub hit_rate: f64,
    pub avg_hit_time_ms: f64,
    pub avg_miss_time_ms: f64,
    pub total_hit_time_ms: u64,
    pub total_miss_time_ms: u64,
    pub last_reset: DateTime<Utc>,
    pub uptime_secs: u64,
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Counters::new()),
        }
    }

    pub fn record_hit(&self, elapsed: Duration) {
        let mut c = self.inner.lock();
        c.hits += 1;
        c.total_hit_time += elapsed;
    }

    pub fn record_miss(&self, elapsed: Duration) {
        let mut c = self.inner.lock();
        c.misses += 1;
        c.total_miss_time += elapsed;
    }

    pub fn record_set(&self) {
        self.inner.lock().sets += 1;
    }

    pub fn record_delete(&self) {
        self.inner.lock().deletes += 1;
    }

    pub fn record_error(&self) {
        self.inner.lock().errors += 1;
    }

    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        let c = self.inner.lock();
        let lookups = c.hits + c.misses;
        let hit_rate = if lookups > 0 {
            c.hits as f64 / lookups as f64 * 100.0
        } else {
            0.0
        };

        CacheMetricsSnapshot {
            hits: c.hits,
            misses: c.misses,
            sets: c.sets,
            deletes: c.deletes,
            errors: c.errors,
            hit_rate,
            avg_hit_time_ms: average_ms(c.total_hit_time, c.hits),
            avg_miss_time_ms: average_ms(c.total_miss_time, c.misses),
            total_hit_time_ms: c.total_hit_time.as_millis() as u64,
            total_miss_time_ms: c.total_miss_time.as_millis() as u64,
            last_reset: c.last_reset,
            uptime_secs: c.started.elapsed().as_secs(),
        }
    }

    /// Zero every counter; only triggered by an explicit operator request
    pub fn reset(&self) {
        *self.inner.lock() = Counters::new();
    }
}

fn average_ms(total: Duration, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total.as_secs_f64() * 1000.0 / count as f64
    }
}
