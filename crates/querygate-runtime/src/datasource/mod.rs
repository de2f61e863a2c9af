//! Data Source Layer
//!
//! Every backend the gateway talks to implements [`DataSource`]:
//! - Columnar query service (pooled job sessions over its REST API)
//! - Cloud data warehouse (REST jobs API)
//!
//! The cache decorator, the batch engine and the stream encoder only see this
//! trait, so backends can be swapped or wrapped freely.

pub mod columnar;
pub mod config;
pub mod query;
pub mod registry;
pub mod sanitizer;
pub mod warehouse;

pub use columnar::{ColumnarConfig, ColumnarConnector, ColumnarSession, ColumnarSource};
pub use config::{DataSourceConfig, DataSourceType};
pub use query::{QueryOptions, QueryResult, SortDirection, SourceType};
pub use registry::DataSourceRegistry;
pub use sanitizer::{is_read_only_sql, SqlSanitizer};
pub use warehouse::{WarehouseConfig, WarehouseSource};

use crate::error::Result;
use crate::pool::PoolMetricsSnapshot;
use async_trait::async_trait;

/// Uniform contract for analytical backends
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Run a read-only SQL query.
    ///
    /// `opts.limit` / `opts.offset` select a window of the result set.
    async fn execute_query(&self, query: &str, opts: &QueryOptions) -> Result<QueryResult>;

    /// Read rows from a table, ordered and paged by `opts`
    async fn get_data(&self, table: &str, opts: &QueryOptions) -> Result<QueryResult>;

    /// Verify the backend is reachable with the configured credentials
    async fn test_connection(&self) -> Result<()>;

    fn source_type(&self) -> SourceType;

    /// Release backend resources
    async fn close(&self) -> Result<()>;

    /// Connection pool counters, for pooled backends
    fn pool_metrics(&self) -> Option<PoolMetricsSnapshot> {
        None
    }
}
