//! Byte sinks for streamed output

use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

/// Destination for encoded stream output.
///
/// `write` may buffer; `flush` makes everything written so far visible to
/// the consumer.
#[async_trait]
pub trait StreamSink: Send {
    async fn write(&mut self, bytes: &[u8]) -> Result<()>;

    async fn flush(&mut self) -> Result<()>;
}

/// Sends each flushed unit as one frame over a bounded channel.
///
/// `flush` waits while the channel is full, so a slow consumer throttles
/// the producer. A dropped receiver surfaces as [`GatewayError::StreamClosed`].
pub struct ChannelSink {
    buffer: BytesMut,
    tx: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            tx,
        }
    }

    /// Sink plus the receiving half, holding at most `capacity` frames
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl StreamSink for ChannelSink {
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.tx.is_closed() {
            return Err(GatewayError::StreamClosed);
        }
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let frame = self.buffer.split().freeze();
        self.tx
            .send(frame)
            .await
            .map_err(|_| GatewayError::StreamClosed)
    }
}

/// Collects output in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    output: Vec<u8>,
    pending: usize,
    flushes: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, flushed or not
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.output).unwrap_or_default()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.output
    }

    /// Number of flushes that carried data
    pub fn flushes(&self) -> usize {
        self.flushes
    }
}

#[async_trait]
impl StreamSink for MemorySink {
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.output.extend_from_slice(bytes);
        self.pending += bytes.len();
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if self.pending > 0 {
            self.flushes += 1;
            self.pending = 0;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_sends_one_frame_per_flush() {
        let (mut sink, mut rx) = ChannelSink::channel(4);
        sink.write(b"a").await.unwrap();
        sink.write(b"b").await.unwrap();
        sink.flush().await.unwrap();
        sink.flush().await.unwrap();
        sink.write(b"c").await.unwrap();
        sink.flush().await.unwrap();
        drop(sink);

        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"ab"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"c"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_channel_sink_reports_closed_receiver() {
        let (mut sink, rx) = ChannelSink::channel(1);
        drop(rx);
        assert!(matches!(
            sink.write(b"x").await,
            Err(GatewayError::StreamClosed)
        ));
    }

    #[tokio::test]
    async fn test_memory_sink_counts_data_flushes() {
        let mut sink = MemorySink::new();
        sink.flush().await.unwrap();
        sink.write(b"hello").await.unwrap();
        sink.flush().await.unwrap();
        assert_eq!(sink.as_str(), "hello");
        assert_eq!(sink.flushes(), 1);
    }
}
