//! Querygate Runtime - query execution behind the gateway
//!
//! This crate provides the data source adapters and the machinery around
//! them: bounded connection pools, a cache-aside decorator, a
//! bounded-concurrency batch engine and a paged streaming encoder.

pub mod batch;
pub mod cache;
pub mod datasource;
pub mod error;
pub mod pool;
pub mod stream;

// Re-export main types
pub use batch::{
    BatchEvent, BatchExecutor, BatchItem, BatchOptions, BatchResponse, BatchResult, BatchStatus,
    BatchSummary,
};
pub use cache::{
    generate_key, CacheBackend, CacheMetricsSnapshot, CachedDataSource, MemoryCache, NoOpCache,
};
#[cfg(feature = "redis")]
pub use cache::RedisCache;
pub use datasource::{
    DataSource, DataSourceConfig, DataSourceRegistry, DataSourceType, QueryOptions, QueryResult,
    SortDirection, SourceType,
};
pub use error::{GatewayError, Result};
pub use pool::{ConnectionPool, Connector, PoolConfig, PoolMetricsSnapshot, PooledConnection};
pub use stream::{
    ChannelSink, MemorySink, StreamEncoder, StreamFormat, StreamRequest, StreamSink, StreamSummary,
};
