//! REST API implementation
//!
//! - types: request/response types and shared state
//! - extractors: JSON body extraction with uniform errors
//! - handlers: endpoint handlers
//! - router: route table

mod extractors;
mod handlers;
mod router;
pub mod types;

pub use extractors::JsonExtractor;
pub use router::create_router;
pub use types::{
    AppState, BatchRequest, CacheStatsResponse, HealthResponse, InvalidateRequest,
    InvalidateResponse, MessageResponse, QueryRequest,
};
