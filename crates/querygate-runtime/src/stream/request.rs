//! Stream request model

use crate::datasource::QueryOptions;
use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const MAX_CHUNK_SIZE: usize = 10_000;

/// Wire format of a streamed result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamFormat {
    /// A single JSON array
    Json,

    /// One JSON object per line
    #[default]
    Ndjson,

    Csv,

    /// Server-sent events
    Sse,
}

impl StreamFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            StreamFormat::Json => "application/json",
            StreamFormat::Ndjson => "application/x-ndjson",
            StreamFormat::Csv => "text/csv",
            StreamFormat::Sse => "text/event-stream",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamFormat::Json => "json",
            StreamFormat::Ndjson => "ndjson",
            StreamFormat::Csv => "csv",
            StreamFormat::Sse => "sse",
        }
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A paged read of one query or table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,

    pub data_source: String,

    /// Rows per fetch; see [`StreamRequest::chunk_size`]
    #[serde(default)]
    pub chunk_size: Option<usize>,

    #[serde(default)]
    pub format: StreamFormat,

    /// Ordering and caching hints; paging fields are ignored
    #[serde(default)]
    pub options: QueryOptions,
}

impl StreamRequest {
    pub fn query(data_source: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            query: Some(sql.into()),
            table: None,
            data_source: data_source.into(),
            chunk_size: None,
            format: StreamFormat::default(),
            options: QueryOptions::default(),
        }
    }

    pub fn table(data_source: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            query: None,
            table: Some(table.into()),
            data_source: data_source.into(),
            chunk_size: None,
            format: StreamFormat::default(),
            options: QueryOptions::default(),
        }
    }

    pub fn with_format(mut self, format: StreamFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    /// Effective chunk size, clamped to `1..=MAX_CHUNK_SIZE`
    pub fn chunk_size(&self) -> usize {
        match self.chunk_size {
            Some(0) | None => DEFAULT_CHUNK_SIZE,
            Some(n) => n.min(MAX_CHUNK_SIZE),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.data_source.trim().is_empty() {
            return Err(GatewayError::InvalidRequest(
                "data_source is required".to_string(),
            ));
        }
        if self.sql().is_none() && self.table_name().is_none() {
            return Err(GatewayError::InvalidRequest(
                "Either query or table must be specified".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn sql(&self) -> Option<&str> {
        self.query.as_deref().filter(|q| !q.trim().is_empty())
    }

    pub(crate) fn table_name(&self) -> Option<&str> {
        self.table.as_deref().filter(|t| !t.trim().is_empty())
    }

    /// Options for the page starting at `offset`
    pub(crate) fn page_options(&self, offset: usize) -> QueryOptions {
        QueryOptions {
            limit: Some(self.chunk_size()),
            offset: Some(offset),
            ..self.options.clone()
        }
    }
}
