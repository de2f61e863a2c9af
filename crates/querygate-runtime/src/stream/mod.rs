//! Streaming encoder
//!
//! Large result sets are read page by page and written to a [`StreamSink`]
//! as JSON, NDJSON, CSV or server-sent events.

mod encoder;
mod format;
mod request;
mod sink;

pub use encoder::{StreamEncoder, StreamSummary, NDJSON_FLUSH_ROWS};
pub use request::{StreamFormat, StreamRequest, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
pub use sink::{ChannelSink, MemorySink, StreamSink};
