//! Batch executor
//!
//! Each item runs on its own task and must hold a semaphore permit while it
//! executes, so at most `max_concurrency` queries are in flight. Results are
//! slotted back by submission index.

use super::types::{
    BatchEvent, BatchItem, BatchOptions, BatchResponse, BatchResult, BatchSummary, MAX_BATCH_SIZE,
};
use crate::datasource::DataSourceRegistry;
use crate::error::{GatewayError, Result};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CANCELLED: &str = "Context cancelled";

/// Runs batches of queries against a registry
#[derive(Clone)]
pub struct BatchExecutor {
    registry: Arc<DataSourceRegistry>,
}

impl BatchExecutor {
    pub fn new(registry: Arc<DataSourceRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<DataSourceRegistry> {
        &self.registry
    }

    /// Execute every item with bounded concurrency.
    ///
    /// Fails only on an invalid batch; per-item failures are reported in the
    /// item's result.
    pub async fn execute(
        &self,
        items: Vec<BatchItem>,
        options: &BatchOptions,
        cancel: CancellationToken,
    ) -> Result<BatchResponse> {
        validate(&items)?;

        let request_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();
        let deadline = started + options.timeout();
        let concurrency = options.concurrency();
        let stop_on_error = options.stop_on_error;

        info!(
            "Executing batch {} ({} queries, concurrency {})",
            request_id,
            items.len(),
            concurrency
        );

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let abort = Arc::new(AtomicBool::new(false));
        let mut tasks = JoinSet::new();

        for (index, item) in items.iter().cloned().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let abort = Arc::clone(&abort);
            let registry = Arc::clone(&self.registry);
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (index, BatchResult::error(&item.id, CANCELLED, Duration::ZERO)),
                };

                if stop_on_error && abort.load(Ordering::Relaxed) {
                    return (index, BatchResult::skipped(&item.id));
                }

                let result = run_with_deadline(&registry, &item, deadline, &cancel).await;
                if stop_on_error && result.is_error() {
                    abort.store(true, Ordering::Relaxed);
                }
                (index, result)
            });
        }

        let mut slots: Vec<Option<BatchResult>> = vec![None; items.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(err) => warn!("Batch {} task failed: {}", request_id, err),
            }
        }

        let results: Vec<BatchResult> = slots
            .into_iter()
            .zip(&items)
            .map(|(slot, item)| {
                slot.unwrap_or_else(|| {
                    BatchResult::error(&item.id, "query task aborted", Duration::ZERO)
                })
            })
            .collect();

        let summary = BatchSummary::from_results(&results, started.elapsed());
        info!(
            "Batch {} finished: {} ok, {} failed, {} skipped in {}ms",
            request_id, summary.successful, summary.failed, summary.skipped, summary.total_time_ms
        );

        Ok(BatchResponse {
            request_id,
            results,
            summary,
            timestamp: Utc::now(),
        })
    }

    /// Execute items one at a time, publishing an event per result.
    ///
    /// Returns `StreamClosed` if the receiver goes away before the batch ends.
    pub async fn execute_streaming(
        &self,
        items: Vec<BatchItem>,
        options: &BatchOptions,
        events: mpsc::Sender<BatchEvent>,
        cancel: CancellationToken,
    ) -> Result<BatchSummary> {
        validate(&items)?;

        let started = Instant::now();
        let deadline = started + options.timeout();

        send(
            &events,
            BatchEvent::Start {
                total_queries: items.len(),
                timestamp: Utc::now(),
            },
        )
        .await?;

        let mut results = Vec::with_capacity(items.len());
        let mut aborted = false;

        for (index, item) in items.iter().enumerate() {
            let result = if aborted {
                BatchResult::skipped(&item.id)
            } else {
                run_with_deadline(&self.registry, item, deadline, &cancel).await
            };

            if options.stop_on_error && result.is_error() {
                aborted = true;
            }

            send(
                &events,
                BatchEvent::Result {
                    index,
                    result: result.clone(),
                },
            )
            .await?;
            results.push(result);
        }

        let summary = BatchSummary::from_results(&results, started.elapsed());
        send(
            &events,
            BatchEvent::Complete {
                summary: summary.clone(),
                timestamp: Utc::now(),
            },
        )
        .await?;

        Ok(summary)
    }
}

/// Reject empty and oversized batches
pub fn validate(items: &[BatchItem]) -> Result<()> {
    if items.is_empty() {
        return Err(GatewayError::InvalidRequest("No queries provided".to_string()));
    }
    if items.len() > MAX_BATCH_SIZE {
        return Err(GatewayError::InvalidRequest(format!(
            "Batch size exceeds maximum of {} queries",
            MAX_BATCH_SIZE
        )));
    }
    Ok(())
}

async fn send(events: &mpsc::Sender<BatchEvent>, event: BatchEvent) -> Result<()> {
    events.send(event).await.map_err(|_| GatewayError::StreamClosed)
}

async fn run_with_deadline(
    registry: &DataSourceRegistry,
    item: &BatchItem,
    deadline: Instant,
    cancel: &CancellationToken,
) -> BatchResult {
    if cancel.is_cancelled() || Instant::now() >= deadline {
        return BatchResult::error(&item.id, CANCELLED, Duration::ZERO);
    }

    let started = Instant::now();
    tokio::select! {
        biased;
        _ = cancel.cancelled() => BatchResult::error(&item.id, CANCELLED, started.elapsed()),
        outcome = timeout_at(deadline, run_item(registry, item)) => match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!("Batch query {} exceeded the batch deadline", item.id);
                BatchResult::error(&item.id, CANCELLED, started.elapsed())
            }
        },
    }
}

async fn run_item(registry: &DataSourceRegistry, item: &BatchItem) -> BatchResult {
    let started = Instant::now();

    let source = match registry.resolve(&item.data_source) {
        Ok(source) => source,
        Err(err) => return BatchResult::error(&item.id, err.to_string(), started.elapsed()),
    };

    let outcome = match (item.sql(), item.table_name()) {
        (Some(sql), _) => source.execute_query(sql, &item.options).await,
        (None, Some(table)) => source.get_data(table, &item.options).await,
        (None, None) => {
            return BatchResult::error(
                &item.id,
                "Either query or table must be specified",
                started.elapsed(),
            )
        }
    };

    match outcome {
        Ok(result) => {
            debug!("Batch query {} returned {} rows", item.id, result.count);
            BatchResult::success(&item.id, result, started.elapsed())
        }
        Err(err) => {
            warn!("Batch query {} failed: {}", item.id, err);
            BatchResult::error(&item.id, err.to_string(), started.elapsed())
        }
    }
}
