//! Bounded-concurrency batch execution
//!
//! A batch runs up to 100 independent queries against named data sources.
//! At most `max_concurrency` items execute at once; results come back in the
//! order the items were submitted regardless of completion order.

mod executor;
mod types;

pub use executor::{validate, BatchExecutor};
pub use types::{
    BatchEvent, BatchItem, BatchOptions, BatchResponse, BatchResult, BatchStatus, BatchSummary,
    DEFAULT_CONCURRENCY, DEFAULT_TIMEOUT, MAX_BATCH_SIZE, MAX_CONCURRENCY,
};
