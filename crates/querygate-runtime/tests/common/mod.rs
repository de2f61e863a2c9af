//! Shared fakes for the runtime integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use querygate_core::{Row, Value};
use querygate_runtime::datasource::{DataSource, QueryOptions, QueryResult, SourceType};
use querygate_runtime::error::{GatewayError, Result};
use querygate_runtime::pool::Connector;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Serves `total` numbered rows, honoring `limit` / `offset`.
///
/// Any SQL containing `FAIL` is rejected. Records every fetch and the peak
/// number of overlapping calls.
pub struct PagedSource {
    total: usize,
    delay: Duration,
    fetches: Mutex<Vec<(usize, usize)>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl PagedSource {
    pub fn new(total: usize) -> Arc<Self> {
        Self::with_delay(total, Duration::ZERO)
    }

    pub fn with_delay(total: usize, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            total,
            delay,
            fetches: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        })
    }

    /// `(offset, rows returned)` for every successful fetch
    pub fn fetches(&self) -> Vec<(usize, usize)> {
        self.fetches.lock().clone()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn serve(&self, sql: &str, opts: &QueryOptions) -> Result<QueryResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if sql.contains("FAIL") {
            return Err(GatewayError::Query(format!("rejected: {}", sql)));
        }

        let offset = opts.offset.unwrap_or(0).min(self.total);
        let end = opts
            .limit
            .map(|limit| (offset + limit).min(self.total))
            .unwrap_or(self.total);
        let rows: Vec<Row> = (offset..end).map(numbered_row).collect();
        self.fetches.lock().push((offset, rows.len()));
        Ok(QueryResult::new(rows, SourceType::Warehouse))
    }
}

pub fn numbered_row(i: usize) -> Row {
    let mut row = Row::new();
    row.insert("id".to_string(), Value::Integer(i as i64));
    row.insert("name".to_string(), Value::String(format!("user-{}", i)));
    row
}

#[async_trait]
impl DataSource for PagedSource {
    async fn execute_query(&self, query: &str, opts: &QueryOptions) -> Result<QueryResult> {
        self.serve(query, opts).await
    }

    async fn get_data(&self, table: &str, opts: &QueryOptions) -> Result<QueryResult> {
        self.serve(table, opts).await
    }

    async fn test_connection(&self) -> Result<()> {
        Ok(())
    }

    fn source_type(&self) -> SourceType {
        SourceType::Warehouse
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Connector handing out numbered connections
#[derive(Default)]
pub struct CountingConnector {
    pub dials: AtomicUsize,
    pub closes: AtomicUsize,
    pub refuse: AtomicBool,
    /// Milliseconds every ping takes
    pub ping_delay_ms: AtomicU64,
}

pub struct TestConnector(pub Arc<CountingConnector>);

#[async_trait]
impl Connector for TestConnector {
    type Connection = usize;

    async fn connect(&self) -> Result<usize> {
        if self.0.refuse.load(Ordering::SeqCst) {
            return Err(GatewayError::ConnectionFailed("refused".to_string()));
        }
        Ok(self.0.dials.fetch_add(1, Ordering::SeqCst))
    }

    async fn ping(&self, _conn: &usize) -> Result<()> {
        let delay = self.0.ping_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(())
    }

    fn close(&self, _conn: &usize) {
        self.0.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn describe(&self) -> String {
        "test".to_string()
    }
}
