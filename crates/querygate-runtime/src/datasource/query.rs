//! Query options and results shared by every data source

use querygate_core::Row;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Kind of backend behind a data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    /// Columnar streaming query service
    Columnar,

    /// Cloud data warehouse
    Warehouse,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Columnar => "COLUMNAR",
            SourceType::Warehouse => "WAREHOUSE",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sort direction for table reads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Per-request query options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Maximum number of rows to return
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    /// Number of rows to skip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,

    /// Column to order table reads by
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,

    /// Direction for `order_by`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_dir: Option<SortDirection>,

    /// Cache TTL override in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl_secs: Option<u64>,

    /// Query timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl QueryOptions {
    /// Options for one page of a paged read
    pub fn page(limit: usize, offset: usize) -> Self {
        Self {
            limit: Some(limit),
            offset: Some(offset),
            ..Default::default()
        }
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_secs.map(Duration::from_secs)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Deterministic string over the fields that change the result set.
    ///
    /// TTL and timeout are excluded: they change how a result is obtained,
    /// not which rows it contains.
    pub fn cache_signature(&self) -> String {
        format!(
            "limit={}|offset={}|order_by={}|order_dir={}",
            self.limit.map(|v| v.to_string()).unwrap_or_default(),
            self.offset.map(|v| v.to_string()).unwrap_or_default(),
            self.order_by.as_deref().unwrap_or_default(),
            self.order_dir.map(|d| d.as_sql()).unwrap_or_default(),
        )
    }
}

/// Result of a query against a data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Result rows in backend order
    #[serde(rename = "data")]
    pub rows: Vec<Row>,

    /// Number of rows
    pub count: usize,

    /// Backend that produced the rows
    pub source: SourceType,

    /// Whether the rows came from the cache
    #[serde(default)]
    pub cache_hit: bool,

    /// Wall time spent producing the result
    #[serde(default)]
    pub query_time_ms: u64,
}

impl QueryResult {
    pub fn new(rows: Vec<Row>, source: SourceType) -> Self {
        Self {
            count: rows.len(),
            rows,
            source,
            cache_hit: false,
            query_time_ms: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn with_query_time(mut self, elapsed: Duration) -> Self {
        self.query_time_ms = elapsed.as_millis() as u64;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use querygate_core::Value;

    #[test]
    fn test_source_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&SourceType::Columnar).unwrap(),
            r#""COLUMNAR""#
        );
        assert_eq!(SourceType::Warehouse.to_string(), "WAREHOUSE");
    }

    #[test]
    fn test_cache_signature_tracks_paging() {
        let a = QueryOptions::page(100, 0);
        let b = QueryOptions::page(100, 100);
        assert_ne!(a.cache_signature(), b.cache_signature());
        assert_eq!(a.cache_signature(), QueryOptions::page(100, 0).cache_signature());
    }

    #[test]
    fn test_cache_signature_ignores_ttl_and_timeout() {
        let plain = QueryOptions::default();
        let tuned = QueryOptions {
            cache_ttl_secs: Some(60),
            timeout_ms: Some(500),
            ..Default::default()
        };
        assert_eq!(plain.cache_signature(), tuned.cache_signature());
    }

    #[test]
    fn test_options_parse_from_request_body() {
        let opts: QueryOptions = serde_json::from_str(
            r#"{"limit": 10, "order_by": "created_at", "order_dir": "DESC", "cache_ttl_secs": 30}"#,
        )
        .unwrap();

        assert_eq!(opts.limit, Some(10));
        assert_eq!(opts.order_dir, Some(SortDirection::Desc));
        assert_eq!(opts.cache_ttl(), Some(Duration::from_secs(30)));
        assert!(opts.timeout().is_none());
    }

    #[test]
    fn test_result_serializes_rows_as_data() {
        let mut row = Row::new();
        row.insert("id".to_string(), Value::Integer(1));
        let result = QueryResult::new(vec![row], SourceType::Warehouse);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["count"], 1);
        assert_eq!(json["source"], "WAREHOUSE");
        assert_eq!(json["data"][0]["id"], 1);
        assert_eq!(json["cache_hit"], false);
    }
}
