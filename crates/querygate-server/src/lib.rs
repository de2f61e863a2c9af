//! Querygate HTTP Server Library
//!
//! Exposes the router, configuration and bootstrap for tests and reuse.

pub mod api;
pub mod config;
pub mod error;
pub mod gateway;
