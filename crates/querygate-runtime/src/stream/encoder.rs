//! Paged streaming of query results
//!
//! The encoder walks a result set `chunk_size` rows at a time and hands each
//! page to the format encoder, flushing as it goes. A short page ends the
//! stream. Backend failures end it with a terminal error unit so the consumer
//! can tell a truncated stream from a complete one.

use super::format::{encoder_for, Page};
use super::request::StreamRequest;
use super::sink::StreamSink;
use crate::datasource::{DataSource, QueryResult};
use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Rows between NDJSON flushes
pub const NDJSON_FLUSH_ROWS: usize = 100;

/// Outcome of one stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamSummary {
    pub total_rows: usize,
    pub fetches: usize,
    pub duration_ms: u64,

    /// Reached the end of the result set
    pub completed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Drives the paging loop for one request
#[derive(Debug, Clone)]
pub struct StreamEncoder {
    ndjson_flush_rows: usize,
}

impl Default for StreamEncoder {
    fn default() -> Self {
        Self {
            ndjson_flush_rows: NDJSON_FLUSH_ROWS,
        }
    }
}

impl StreamEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ndjson_flush_rows(mut self, rows: usize) -> Self {
        self.ndjson_flush_rows = rows.max(1);
        self
    }

    /// Stream `request` from `source` into `sink`.
    ///
    /// Backend errors and cancellation are reported through the summary and
    /// the output itself; `Err` means the request was invalid or the sink
    /// failed.
    pub async fn stream(
        &self,
        source: &dyn DataSource,
        request: &StreamRequest,
        sink: &mut dyn StreamSink,
        cancel: &CancellationToken,
    ) -> Result<StreamSummary> {
        request.validate()?;

        let chunk_size = request.chunk_size();
        let started = Instant::now();
        let mut encoder = encoder_for(
            request.format,
            &request.data_source,
            chunk_size,
            self.ndjson_flush_rows,
        );
        let mut summary = StreamSummary::default();
        let mut offset = 0;

        encoder.begin(sink).await?;

        loop {
            let opts = request.page_options(offset);
            let fetched = if cancel.is_cancelled() {
                None
            } else {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    result = fetch(source, request, &opts) => Some(result),
                }
            };

            let page = match fetched {
                None => {
                    summary.error = Some(GatewayError::Cancelled.to_string());
                    summary.duration_ms = started.elapsed().as_millis() as u64;
                    info!(
                        "Stream from '{}' cancelled after {} rows",
                        request.data_source, summary.total_rows
                    );
                    if let Err(err) = encoder.abort(sink).await {
                        debug!("Could not write abort marker: {}", err);
                    }
                    return Ok(summary);
                }
                Some(Err(err)) => {
                    error!(
                        "Stream query on '{}' failed at offset {}: {}",
                        request.data_source, offset, err
                    );
                    let message = err.to_string();
                    summary.duration_ms = started.elapsed().as_millis() as u64;
                    encoder.fail(sink, &message).await?;
                    summary.error = Some(message);
                    return Ok(summary);
                }
                Some(Ok(page)) => page,
            };

            let rows = page.rows.len();
            summary.fetches += 1;
            summary.total_rows += rows;

            encoder
                .page(
                    sink,
                    Page {
                        rows: &page.rows,
                        offset,
                        cache_hit: page.cache_hit,
                        rows_processed: summary.total_rows,
                        elapsed: started.elapsed(),
                    },
                )
                .await?;

            debug!(
                "Streamed page at offset {} ({} rows, {} total)",
                offset, rows, summary.total_rows
            );

            if rows < chunk_size {
                break;
            }
            offset += chunk_size;
        }

        summary.completed = true;
        summary.duration_ms = started.elapsed().as_millis() as u64;
        encoder.finish(sink, &summary).await?;

        info!(
            "{} stream from '{}' completed: {} rows in {} fetches, {}ms",
            request.format,
            request.data_source,
            summary.total_rows,
            summary.fetches,
            summary.duration_ms
        );
        Ok(summary)
    }
}

async fn fetch(
    source: &dyn DataSource,
    request: &StreamRequest,
    opts: &crate::datasource::QueryOptions,
) -> Result<QueryResult> {
    match (request.sql(), request.table_name()) {
        (Some(sql), _) => source.execute_query(sql, opts).await,
        (None, Some(table)) => source.get_data(table, opts).await,
        (None, None) => Err(GatewayError::InvalidRequest(
            "Either query or table must be specified".to_string(),
        )),
    }
}
