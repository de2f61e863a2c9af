//! Per-format framing of streamed pages

use super::encoder::StreamSummary;
use super::request::StreamFormat;
use super::sink::StreamSink;
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use chrono::Utc;
use querygate_core::{Row, Value};
use serde::Serialize;
use serde_json::json;
use std::time::Duration;

/// One fetched page plus running totals
pub(crate) struct Page<'a> {
    pub rows: &'a [Row],
    pub offset: usize,
    pub cache_hit: bool,
    pub rows_processed: usize,
    pub elapsed: Duration,
}

/// Framing hooks called by the paging loop, in order:
/// `begin`, `page`*, then exactly one of `finish`, `fail` or `abort`.
#[async_trait]
pub(crate) trait FormatEncoder: Send {
    async fn begin(&mut self, _sink: &mut dyn StreamSink) -> Result<()> {
        Ok(())
    }

    async fn page(&mut self, sink: &mut dyn StreamSink, page: Page<'_>) -> Result<()>;

    async fn finish(&mut self, sink: &mut dyn StreamSink, summary: &StreamSummary) -> Result<()>;

    async fn fail(&mut self, sink: &mut dyn StreamSink, message: &str) -> Result<()>;

    async fn abort(&mut self, _sink: &mut dyn StreamSink) -> Result<()> {
        Ok(())
    }
}

pub(crate) fn encoder_for(
    format: StreamFormat,
    data_source: &str,
    chunk_size: usize,
    flush_rows: usize,
) -> Box<dyn FormatEncoder> {
    match format {
        StreamFormat::Json => Box::new(JsonArray::default()),
        StreamFormat::Ndjson => Box::new(Ndjson {
            flush_rows: flush_rows.max(1),
            written: 0,
        }),
        StreamFormat::Csv => Box::new(Csv::default()),
        StreamFormat::Sse => Box::new(Sse {
            data_source: data_source.to_string(),
            chunk_size,
        }),
    }
}

fn error_object(message: &str) -> serde_json::Value {
    json!({ "type": "error", "error": message })
}

#[derive(Default)]
struct JsonArray {
    written: usize,
}

impl JsonArray {
    async fn element(&mut self, sink: &mut dyn StreamSink, bytes: &[u8]) -> Result<()> {
        if self.written > 0 {
            sink.write(b",\n").await?;
        }
        sink.write(b"  ").await?;
        sink.write(bytes).await?;
        self.written += 1;
        Ok(())
    }

    async fn close(&mut self, sink: &mut dyn StreamSink) -> Result<()> {
        sink.write(b"\n]\n").await?;
        sink.flush().await
    }
}

#[async_trait]
impl FormatEncoder for JsonArray {
    async fn begin(&mut self, sink: &mut dyn StreamSink) -> Result<()> {
        sink.write(b"[\n").await?;
        sink.flush().await
    }

    async fn page(&mut self, sink: &mut dyn StreamSink, page: Page<'_>) -> Result<()> {
        for row in page.rows {
            let encoded = serde_json::to_vec(row)?;
            self.element(sink, &encoded).await?;
        }
        sink.flush().await
    }

    async fn finish(&mut self, sink: &mut dyn StreamSink, _summary: &StreamSummary) -> Result<()> {
        self.close(sink).await
    }

    async fn fail(&mut self, sink: &mut dyn StreamSink, message: &str) -> Result<()> {
        let encoded = serde_json::to_vec(&error_object(message))?;
        self.element(sink, &encoded).await?;
        self.close(sink).await
    }

    async fn abort(&mut self, sink: &mut dyn StreamSink) -> Result<()> {
        self.close(sink).await
    }
}

struct Ndjson {
    flush_rows: usize,
    written: usize,
}

impl Ndjson {
    async fn line(sink: &mut dyn StreamSink, value: &impl Serialize) -> Result<()> {
        let mut encoded = serde_json::to_vec(value)?;
        encoded.push(b'\n');
        sink.write(&encoded).await
    }
}

#[async_trait]
impl FormatEncoder for Ndjson {
    async fn page(&mut self, sink: &mut dyn StreamSink, page: Page<'_>) -> Result<()> {
        for row in page.rows {
            Self::line(sink, row).await?;
            self.written += 1;
            if self.written % self.flush_rows == 0 {
                sink.flush().await?;
            }
        }
        sink.flush().await
    }

    async fn finish(&mut self, sink: &mut dyn StreamSink, summary: &StreamSummary) -> Result<()> {
        let line = json!({
            "type": "summary",
            "total_rows": summary.total_rows,
            "duration_ms": summary.duration_ms,
            "timestamp": Utc::now(),
        });
        Self::line(sink, &line).await?;
        sink.flush().await
    }

    async fn fail(&mut self, sink: &mut dyn StreamSink, message: &str) -> Result<()> {
        Self::line(sink, &error_object(message)).await?;
        sink.flush().await
    }
}

/// CSV with a header taken from the first row seen
#[derive(Default)]
struct Csv {
    columns: Option<Vec<String>>,
}

#[async_trait]
impl FormatEncoder for Csv {
    async fn page(&mut self, sink: &mut dyn StreamSink, page: Page<'_>) -> Result<()> {
        let Some(first) = page.rows.first() else {
            return Ok(());
        };

        let write_header = self.columns.is_none();
        let columns = self
            .columns
            .get_or_insert_with(|| first.keys().cloned().collect());

        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        if write_header {
            writer.write_record(columns.iter())?;
        }
        for row in page.rows {
            writer.write_record(
                columns
                    .iter()
                    .map(|c| row.get(c).map(Value::to_csv_field).unwrap_or_default()),
            )?;
        }
        let encoded = writer
            .into_inner()
            .map_err(|e| GatewayError::Io(e.into_error()))?;

        sink.write(&encoded).await?;
        sink.flush().await
    }

    async fn finish(&mut self, _sink: &mut dyn StreamSink, _summary: &StreamSummary) -> Result<()> {
        Ok(())
    }

    async fn fail(&mut self, _sink: &mut dyn StreamSink, _message: &str) -> Result<()> {
        Ok(())
    }
}

struct Sse {
    data_source: String,
    chunk_size: usize,
}

impl Sse {
    async fn event(sink: &mut dyn StreamSink, name: &str, data: serde_json::Value) -> Result<()> {
        let frame = format!("event: {}\ndata: {}\n\n", name, serde_json::to_string(&data)?);
        sink.write(frame.as_bytes()).await?;
        sink.flush().await
    }
}

#[async_trait]
impl FormatEncoder for Sse {
    async fn begin(&mut self, sink: &mut dyn StreamSink) -> Result<()> {
        let start = json!({
            "data_source": self.data_source,
            "chunk_size": self.chunk_size,
            "timestamp": Utc::now(),
        });
        Self::event(sink, "start", start).await
    }

    async fn page(&mut self, sink: &mut dyn StreamSink, page: Page<'_>) -> Result<()> {
        if !page.rows.is_empty() {
            let data = json!({
                "rows": page.rows,
                "chunk_size": page.rows.len(),
                "offset": page.offset,
                "cache_hit": page.cache_hit,
            });
            Self::event(sink, "data", data).await?;
        }

        let progress = json!({
            "rows_processed": page.rows_processed,
            "elapsed_ms": page.elapsed.as_millis() as u64,
        });
        Self::event(sink, "progress", progress).await
    }

    async fn finish(&mut self, sink: &mut dyn StreamSink, summary: &StreamSummary) -> Result<()> {
        let complete = json!({
            "total_rows": summary.total_rows,
            "duration_ms": summary.duration_ms,
            "timestamp": Utc::now(),
        });
        Self::event(sink, "complete", complete).await
    }

    async fn fail(&mut self, sink: &mut dyn StreamSink, message: &str) -> Result<()> {
        Self::event(sink, "error", json!({ "error": message })).await
    }

    async fn abort(&mut self, sink: &mut dyn StreamSink) -> Result<()> {
        Self::event(sink, "abort", json!({ "reason": "Context cancelled" })).await
    }
}
