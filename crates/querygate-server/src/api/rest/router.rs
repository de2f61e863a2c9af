//! Router creation and configuration
//!
//! Creates the Axum router for the gateway's REST endpoints.

use super::handlers::*;
use super::types::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create REST API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/query", post(query))
        .route("/batch", post(batch))
        .route("/batch/stream", post(batch_stream))
        .route("/stream", post(stream))
        .route("/cache/stats", get(cache_stats))
        .route("/cache/stats/reset", post(reset_cache_stats))
        .route("/cache/invalidate", post(invalidate_cache))
        .route("/pool/metrics", get(pool_metrics))
        .fallback(not_found)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
