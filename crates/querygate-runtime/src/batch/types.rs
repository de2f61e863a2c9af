//! Batch request and response types

use crate::datasource::{QueryOptions, QueryResult};
use chrono::{DateTime, Utc};
use querygate_core::Row;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest accepted batch
pub const MAX_BATCH_SIZE: usize = 100;
/// Ceiling for `max_concurrency`
pub const MAX_CONCURRENCY: usize = 20;
pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// One query in a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    pub id: String,

    /// Free-form SQL; takes precedence over `table`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,

    pub data_source: String,

    #[serde(default)]
    pub options: QueryOptions,
}

impl BatchItem {
    pub fn query(id: impl Into<String>, data_source: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            query: Some(sql.into()),
            table: None,
            data_source: data_source.into(),
            options: QueryOptions::default(),
        }
    }

    pub fn table(id: impl Into<String>, data_source: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            query: None,
            table: Some(table.into()),
            data_source: data_source.into(),
            options: QueryOptions::default(),
        }
    }

    pub(crate) fn sql(&self) -> Option<&str> {
        self.query.as_deref().filter(|q| !q.trim().is_empty())
    }

    pub(crate) fn table_name(&self) -> Option<&str> {
        self.table.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// Execution knobs for a batch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOptions {
    #[serde(default)]
    pub max_concurrency: Option<usize>,

    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Skip items that have not started once any item fails
    #[serde(default)]
    pub stop_on_error: bool,
}

impl BatchOptions {
    /// Requested concurrency clamped to `1..=MAX_CONCURRENCY`
    pub fn concurrency(&self) -> usize {
        match self.max_concurrency {
            Some(0) | None => DEFAULT_CONCURRENCY,
            Some(n) => n.min(MAX_CONCURRENCY),
        }
    }

    pub fn timeout(&self) -> Duration {
        match self.timeout_ms {
            Some(0) | None => DEFAULT_TIMEOUT,
            Some(ms) => Duration::from_millis(ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Success,
    Error,
    Skipped,
}

/// Outcome of one batch item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub id: String,
    pub status: BatchStatus,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<Row>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub query_time_ms: u64,
    pub row_count: usize,
    pub cache_hit: bool,
}

impl BatchResult {
    pub fn success(id: &str, result: QueryResult, elapsed: Duration) -> Self {
        Self {
            id: id.to_string(),
            status: BatchStatus::Success,
            row_count: result.count,
            cache_hit: result.cache_hit,
            data: result.rows,
            error: None,
            query_time_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn error(id: &str, message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            id: id.to_string(),
            status: BatchStatus::Error,
            data: Vec::new(),
            error: Some(message.into()),
            query_time_ms: elapsed.as_millis() as u64,
            row_count: 0,
            cache_hit: false,
        }
    }

    pub fn skipped(id: &str) -> Self {
        Self {
            id: id.to_string(),
            status: BatchStatus::Skipped,
            data: Vec::new(),
            error: Some("Skipped due to previous error".to_string()),
            query_time_ms: 0,
            row_count: 0,
            cache_hit: false,
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == BatchStatus::Error
    }
}

/// Aggregate counts for a batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_time_ms: u64,
    pub cache_hits: usize,
}

impl BatchSummary {
    pub fn from_results(results: &[BatchResult], elapsed: Duration) -> Self {
        let mut summary = Self {
            total: results.len(),
            total_time_ms: elapsed.as_millis() as u64,
            ..Default::default()
        };

        for result in results {
            match result.status {
                BatchStatus::Success => {
                    summary.successful += 1;
                    if result.cache_hit {
                        summary.cache_hits += 1;
                    }
                }
                BatchStatus::Error => summary.failed += 1,
                BatchStatus::Skipped => summary.skipped += 1,
            }
        }

        summary
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub request_id: String,
    pub results: Vec<BatchResult>,
    pub summary: BatchSummary,
    pub timestamp: DateTime<Utc>,
}

/// Progress events of a streamed batch
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BatchEvent {
    Start {
        total_queries: usize,
        timestamp: DateTime<Utc>,
    },
    Result {
        index: usize,
        result: BatchResult,
    },
    Complete {
        summary: BatchSummary,
        timestamp: DateTime<Utc>,
    },
}

impl BatchEvent {
    /// SSE event name
    pub fn name(&self) -> &'static str {
        match self {
            BatchEvent::Start { .. } => "start",
            BatchEvent::Result { .. } => "result",
            BatchEvent::Complete { .. } => "complete",
        }
    }
}
