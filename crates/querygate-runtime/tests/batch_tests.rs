//! Batch engine behavior

mod common;

use common::PagedSource;
use querygate_runtime::batch::{BatchExecutor, BatchItem, BatchOptions, BatchStatus};
use querygate_runtime::datasource::DataSourceRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn executor_with(source: Arc<PagedSource>) -> BatchExecutor {
    let mut registry = DataSourceRegistry::new();
    registry.register("dwh", source);
    BatchExecutor::new(Arc::new(registry))
}

fn options(max_concurrency: usize) -> BatchOptions {
    BatchOptions {
        max_concurrency: Some(max_concurrency),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let source = PagedSource::with_delay(10, Duration::from_millis(20));
    let executor = executor_with(source.clone());
    let items = (0..12)
        .map(|i| BatchItem::query(format!("q{}", i), "dwh", "SELECT * FROM t"))
        .collect();

    let response = executor
        .execute(items, &options(3), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.summary.successful, 12);
    assert!(source.peak_concurrency() <= 3);
    assert!(source.peak_concurrency() >= 2);
}

#[tokio::test]
async fn test_results_follow_submission_order() {
    let executor = executor_with(PagedSource::with_delay(1, Duration::from_millis(5)));
    let items: Vec<BatchItem> = (0..20)
        .map(|i| BatchItem::query(format!("item-{}", i), "dwh", "SELECT 1"))
        .collect();
    let ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();

    let response = executor
        .execute(items, &options(8), CancellationToken::new())
        .await
        .unwrap();

    let got: Vec<String> = response.results.iter().map(|r| r.id.clone()).collect();
    assert_eq!(got, ids);
    let summary = &response.summary;
    assert_eq!(summary.total, 20);
    assert_eq!(summary.total, summary.successful + summary.failed + summary.skipped);
}

#[tokio::test]
async fn test_mixed_batch_reports_each_outcome() {
    let executor = executor_with(PagedSource::new(3));
    let items = vec![
        BatchItem::query("ok", "dwh", "SELECT * FROM users"),
        BatchItem::query("missing", "nowhere", "SELECT 1"),
        BatchItem::table("table", "dwh", "users"),
        BatchItem {
            query: None,
            ..BatchItem::query("empty", "dwh", "")
        },
        BatchItem::query("bad", "dwh", "SELECT FAIL"),
    ];

    let response = executor
        .execute(items, &BatchOptions::default(), CancellationToken::new())
        .await
        .unwrap();

    let r = &response.results;
    assert_eq!(r[0].status, BatchStatus::Success);
    assert_eq!(r[0].row_count, 3);
    assert_eq!(r[1].error.as_deref(), Some("Unknown data source: nowhere"));
    assert_eq!(r[2].status, BatchStatus::Success);
    assert_eq!(
        r[3].error.as_deref(),
        Some("Either query or table must be specified")
    );
    assert!(r[4].error.as_deref().unwrap().contains("rejected"));
    assert_eq!(response.summary.successful, 2);
    assert_eq!(response.summary.failed, 3);
    assert!(!response.request_id.is_empty());
}

#[tokio::test]
async fn test_stop_on_error_skips_pending_items() {
    let executor = executor_with(PagedSource::with_delay(1, Duration::from_millis(5)));
    let mut items = vec![BatchItem::query("first", "dwh", "SELECT FAIL")];
    items.extend((0..5).map(|i| BatchItem::query(format!("q{}", i), "dwh", "SELECT 1")));

    let opts = BatchOptions {
        max_concurrency: Some(1),
        stop_on_error: true,
        ..Default::default()
    };
    let response = executor
        .execute(items, &opts, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.results[0].status, BatchStatus::Error);
    assert_eq!(response.summary.failed, 1);
    assert_eq!(response.summary.skipped + response.summary.successful, 5);
    assert!(response.summary.skipped >= 1);
    for skipped in response.results.iter().filter(|r| r.status == BatchStatus::Skipped) {
        assert_eq!(skipped.error.as_deref(), Some("Skipped due to previous error"));
    }
}

#[tokio::test(start_paused = true)]
async fn test_deadline_fails_slow_items() {
    let executor = executor_with(PagedSource::with_delay(1, Duration::from_secs(10)));
    let items = vec![
        BatchItem::query("a", "dwh", "SELECT 1"),
        BatchItem::query("b", "dwh", "SELECT 1"),
    ];
    let opts = BatchOptions {
        timeout_ms: Some(500),
        ..Default::default()
    };

    let response = executor
        .execute(items, &opts, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.summary.failed, 2);
    assert!(response
        .results
        .iter()
        .all(|r| r.error.as_deref() == Some("Context cancelled")));
}

#[tokio::test]
async fn test_streaming_batch_emits_start_results_complete() {
    let executor = executor_with(PagedSource::new(2));
    let items = vec![
        BatchItem::query("a", "dwh", "SELECT 1"),
        BatchItem::query("b", "ghost", "SELECT 1"),
    ];
    let (tx, mut rx) = mpsc::channel(8);

    let summary = executor
        .execute_streaming(items, &BatchOptions::default(), tx, CancellationToken::new())
        .await
        .unwrap();

    let mut names = Vec::new();
    while let Some(event) = rx.recv().await {
        names.push(event.name());
    }
    assert_eq!(names, vec!["start", "result", "result", "complete"]);
    assert_eq!(summary.successful, 1);
    assert_eq!(summary.failed, 1);
}

#[tokio::test]
async fn test_streaming_batch_stops_when_receiver_drops() {
    let executor = executor_with(PagedSource::new(2));
    let items = vec![BatchItem::query("a", "dwh", "SELECT 1")];
    let (tx, rx) = mpsc::channel(1);
    drop(rx);

    let result = executor
        .execute_streaming(items, &BatchOptions::default(), tx, CancellationToken::new())
        .await;
    assert!(result.is_err());
}
