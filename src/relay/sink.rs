//! Outbound sinks for relayed frames.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// The client went away; nothing more can be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("client disconnected")]
pub struct SinkClosed;

/// An open output channel towards one client.
///
/// The relay driver is the only writer and guarantees `close` is called at
/// most once, after which `write` is never called again.
#[async_trait]
pub trait Sink: Send {
    /// Write one complete frame.
    async fn write(&mut self, frame: Bytes) -> Result<(), SinkClosed>;

    /// Signal end of stream.
    async fn close(&mut self);

    /// Resolves once the client is gone. Sinks that cannot observe this
    /// never resolve.
    async fn closed(&mut self) {
        futures::future::pending::<()>().await
    }
}

/// Item type of a streaming axum/hyper body.
pub type BodyChunk = Result<Bytes, std::io::Error>;

/// Sink backed by a bounded channel whose receiver is an HTTP response body.
///
/// Dropping the sender ends the body. When hyper drops the receiver because
/// the client disconnected, the next write fails with [`SinkClosed`].
pub struct ChannelSink {
    tx: Option<mpsc::Sender<BodyChunk>>,
}

impl ChannelSink {
    /// Create a sink and the receiver to hand to the response body.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<BodyChunk>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx: Some(tx) }, rx)
    }
}

#[async_trait]
impl Sink for ChannelSink {
    async fn write(&mut self, frame: Bytes) -> Result<(), SinkClosed> {
        let tx = self.tx.as_ref().ok_or(SinkClosed)?;
        tx.send(Ok(frame)).await.map_err(|_| SinkClosed)
    }

    async fn close(&mut self) {
        self.tx.take();
    }

    async fn closed(&mut self) {
        if let Some(tx) = &self.tx {
            tx.closed().await;
        }
    }
}
