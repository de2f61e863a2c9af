//! API endpoint handlers
//!
//! HTTP request handlers for all REST API endpoints.

use super::extractors::JsonExtractor;
use super::types::*;
use crate::error::ServerError;
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderValue, Uri},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::Stream;
use querygate_runtime::batch::{validate as validate_batch, BatchEvent, BatchResponse};
use querygate_runtime::datasource::QueryResult;
use querygate_runtime::error::GatewayError;
use querygate_runtime::stream::{ChannelSink, StreamFormat, StreamRequest};
use querygate_runtime::PoolMetricsSnapshot;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Health check endpoint
pub(super) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        data_sources: state.registry.names(),
    })
}

/// Single query endpoint
pub(super) async fn query(
    State(state): State<AppState>,
    JsonExtractor(payload): JsonExtractor<QueryRequest>,
) -> Result<Json<QueryResult>, ServerError> {
    let source = state.registry.resolve(&payload.data_source)?;
    let timeout = payload.options.timeout().unwrap_or(state.query_timeout);
    let started = Instant::now();

    let sql = payload.query.as_deref().filter(|q| !q.trim().is_empty());
    let table = payload.table.as_deref().filter(|t| !t.trim().is_empty());
    let pending = async {
        match (sql, table) {
            (Some(sql), _) => source.execute_query(sql, &payload.options).await,
            (None, Some(table)) => source.get_data(table, &payload.options).await,
            (None, None) => Err(GatewayError::InvalidRequest(
                "Either query or table must be specified".to_string(),
            )),
        }
    };

    let result = match tokio::time::timeout(timeout, pending).await {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => {
            error!("Query on '{}' failed: {}", payload.data_source, err);
            return Err(err.into());
        }
        Err(_) => {
            error!("Query on '{}' timed out after {:?}", payload.data_source, timeout);
            return Err(GatewayError::Timeout(format!("query exceeded {:?}", timeout)).into());
        }
    };

    info!(
        "Query on '{}' returned {} rows (cache_hit={})",
        payload.data_source, result.count, result.cache_hit
    );
    Ok(Json(result.with_query_time(started.elapsed())))
}

/// Batch endpoint
pub(super) async fn batch(
    State(state): State<AppState>,
    JsonExtractor(payload): JsonExtractor<BatchRequest>,
) -> Result<Json<BatchResponse>, ServerError> {
    // Dropping the request future (client gone) cancels in-flight items.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let response = state
        .batch
        .execute(payload.queries, &payload.options, cancel)
        .await?;
    Ok(Json(response))
}

/// Batch endpoint streaming one SSE event per result
pub(super) async fn batch_stream(
    State(state): State<AppState>,
    JsonExtractor(payload): JsonExtractor<BatchRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ServerError> {
    validate_batch(&payload.queries)?;

    let (tx, rx) = mpsc::channel::<BatchEvent>(state.stream_buffer);
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let executor = state.batch.clone();

    tokio::spawn(async move {
        let BatchRequest { queries, options } = payload;
        match executor.execute_streaming(queries, &options, tx, cancel).await {
            Ok(summary) => debug!(
                "Streamed batch finished: {} ok, {} failed",
                summary.successful, summary.failed
            ),
            Err(err) => warn!("Streamed batch ended early: {}", err),
        }
    });

    let events = ReceiverStream::new(rx).map(move |event| {
        let _guard = &guard;
        Event::default().event(event.name()).json_data(&event)
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Paged streaming endpoint
pub(super) async fn stream(
    State(state): State<AppState>,
    JsonExtractor(payload): JsonExtractor<StreamRequest>,
) -> Result<Response, ServerError> {
    payload.validate()?;
    let source = state.registry.resolve(&payload.data_source)?;
    let format = payload.format;

    let (mut sink, rx) = ChannelSink::channel(state.stream_buffer);
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let encoder = state.encoder.clone();

    info!(
        "Streaming {} from '{}' (chunk size {})",
        format,
        payload.data_source,
        payload.chunk_size()
    );

    tokio::spawn(async move {
        match encoder
            .stream(source.as_ref(), &payload, &mut sink, &cancel)
            .await
        {
            Ok(summary) => debug!(
                "Stream from '{}' done: {} rows, completed={}",
                payload.data_source, summary.total_rows, summary.completed
            ),
            Err(err) => warn!("Stream from '{}' ended early: {}", payload.data_source, err),
        }
    });

    let frames = ReceiverStream::new(rx).map(move |frame| {
        let _guard = &guard;
        Ok::<_, Infallible>(frame)
    });

    let mut response = Body::from_stream(frames).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(format.content_type()),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    if format == StreamFormat::Sse {
        headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    }
    Ok(response)
}

/// Cache statistics endpoint
pub(super) async fn cache_stats(State(state): State<AppState>) -> Json<CacheStatsResponse> {
    let backend_stats = match state.cache.stats().await {
        Ok(stats) => stats,
        Err(err) => {
            warn!("Failed to read cache backend stats: {}", err);
            serde_json::Map::new()
        }
    };

    Json(CacheStatsResponse {
        backend: state.cache_backend.as_str().to_string(),
        backend_stats,
        sources: state.registry.cache_metrics(),
    })
}

/// Cache metrics reset endpoint
pub(super) async fn reset_cache_stats(State(state): State<AppState>) -> Json<MessageResponse> {
    state.registry.reset_cache_metrics();
    info!("Cache metrics reset");
    Json(MessageResponse {
        message: "Cache metrics reset".to_string(),
    })
}

/// Cache invalidation endpoint; an empty body invalidates every cached source
pub(super) async fn invalidate_cache(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<InvalidateResponse>, ServerError> {
    let payload: InvalidateRequest = if body.iter().all(u8::is_ascii_whitespace) {
        InvalidateRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ServerError::InvalidRequest(format!("Invalid JSON data: {}", e)))?
    };

    let invalidated = match state.registry.invalidate(payload.data_source.as_deref()).await {
        Ok(names) => names,
        Err(GatewayError::UnknownDataSource(name)) => {
            return Err(ServerError::NotFound(format!("Unknown data source: {}", name)))
        }
        Err(err) => return Err(err.into()),
    };

    info!("Invalidated cache for {:?}", invalidated);
    Ok(Json(InvalidateResponse { invalidated }))
}

/// Pool metrics endpoint
pub(super) async fn pool_metrics(
    State(state): State<AppState>,
) -> Json<BTreeMap<String, PoolMetricsSnapshot>> {
    Json(state.registry.pool_metrics())
}

/// Fallback for unknown routes
pub(super) async fn not_found(uri: Uri) -> ServerError {
    ServerError::NotFound(format!("No route for {}", uri.path()))
}

