//! Querygate Core - shared value types for the Querygate query gateway
//!
//! - `Value`, the tagged cell value returned by every backend
//! - `Row`, an ordered column-name to value mapping

pub mod types;

pub use types::{Row, Value};
