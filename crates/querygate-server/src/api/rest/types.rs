//! REST API type definitions
//!
//! Request and response types for the REST API endpoints.

use crate::config::CacheBackendKind;
use querygate_runtime::batch::{BatchExecutor, BatchItem, BatchOptions};
use querygate_runtime::cache::{CacheBackend, CacheMetricsSnapshot, NoOpCache};
use querygate_runtime::datasource::{DataSourceRegistry, QueryOptions};
use querygate_runtime::stream::StreamEncoder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<DataSourceRegistry>,
    pub batch: BatchExecutor,
    pub encoder: StreamEncoder,
    pub cache: Arc<dyn CacheBackend>,
    pub cache_backend: CacheBackendKind,

    /// Default deadline for `/query`
    pub query_timeout: Duration,

    /// Frames buffered per streaming response
    pub stream_buffer: usize,
}

impl AppState {
    pub fn new(registry: Arc<DataSourceRegistry>) -> Self {
        Self {
            batch: BatchExecutor::new(Arc::clone(&registry)),
            registry,
            encoder: StreamEncoder::new(),
            cache: Arc::new(NoOpCache::new()),
            cache_backend: CacheBackendKind::None,
            query_timeout: Duration::from_secs(30),
            stream_buffer: 16,
        }
    }

    pub fn with_cache(mut self, kind: CacheBackendKind, cache: Arc<dyn CacheBackend>) -> Self {
        self.cache_backend = kind;
        self.cache = cache;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn with_stream_buffer(mut self, frames: usize) -> Self {
        self.stream_buffer = frames.max(1);
        self
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub data_sources: Vec<String>,
}

/// Single query request
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    /// Free-form read-only SQL
    #[serde(default)]
    pub query: Option<String>,

    /// Table to read when no query is given
    #[serde(default)]
    pub table: Option<String>,

    pub data_source: String,

    #[serde(default)]
    pub options: QueryOptions,
}

/// Batch request
#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub queries: Vec<BatchItem>,

    #[serde(default)]
    pub options: BatchOptions,
}

/// Cache statistics
#[derive(Debug, Serialize)]
pub struct CacheStatsResponse {
    pub backend: String,

    /// Counters reported by the backend itself
    pub backend_stats: serde_json::Map<String, serde_json::Value>,

    /// Decorator counters per cached source
    pub sources: BTreeMap<String, CacheMetricsSnapshot>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InvalidateRequest {
    /// Source to invalidate; every cached source when absent
    #[serde(default)]
    pub data_source: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvalidateResponse {
    pub invalidated: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}
