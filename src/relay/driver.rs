//! Relay state machine.
//!
//! [`RelayDriver`] owns the frame buffer, the decoder and the outbound sink
//! for exactly one upstream request. Every upstream notification is mapped to
//! a [`Signal`] and fed through [`RelayDriver::on_signal`], the single
//! transition function. The sink is closed through one guard so it is closed
//! exactly once no matter which signals arrive, or in what order.

use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};

use super::decode::{Event, EventDecoder, DONE_SENTINEL};
use super::frame::FrameParser;
use super::sink::Sink;
use super::Framing;

/// Upstream notifications, unified.
#[derive(Debug)]
pub enum Signal {
    /// A raw chunk arrived.
    Data(Bytes),
    /// The upstream body ended gracefully.
    End,
    /// The upstream transport failed.
    Error(String),
    /// The upstream connection closed.
    Close,
    /// The client went away.
    Disconnect,
}

/// Relay lifecycle. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Streaming,
    Done,
    Failed,
}

impl RelayState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RelayState::Streaming)
    }
}

/// Summary of a finished relay, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOutcome {
    pub state: RelayState,
    pub tokens: usize,
    pub done_received: bool,
}

pub struct RelayDriver<S> {
    parser: FrameParser,
    decoder: EventDecoder,
    framing: Framing,
    sink: S,
    state: RelayState,
    tokens: usize,
    done_received: bool,
}

impl<S: Sink> RelayDriver<S> {
    pub fn new(decoder: EventDecoder, framing: Framing, sink: S) -> Self {
        Self {
            parser: FrameParser::new(),
            decoder,
            framing,
            sink,
            state: RelayState::Streaming,
            tokens: 0,
            done_received: false,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn outcome(&self) -> RelayOutcome {
        RelayOutcome {
            state: self.state,
            tokens: self.tokens,
            done_received: self.done_received,
        }
    }

    /// Consume the driver, returning the sink.
    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Apply one upstream signal and return the resulting state.
    ///
    /// Signals received in a terminal state are ignored.
    pub async fn on_signal(&mut self, signal: Signal) -> RelayState {
        if self.state.is_terminal() {
            tracing::trace!(?signal, state = ?self.state, "Ignoring signal after termination");
            return self.state;
        }

        match signal {
            Signal::Data(chunk) => self.on_data(&chunk).await,
            Signal::End | Signal::Close => {
                self.parser.finish();
                self.terminate(RelayState::Done).await;
            }
            Signal::Disconnect => {
                tracing::info!(tokens = self.tokens, "Client disconnected mid-stream");
                self.parser.finish();
                self.terminate(RelayState::Failed).await;
            }
            Signal::Error(message) => {
                tracing::error!(error = %message, tokens = self.tokens, "Upstream stream failed");
                self.parser.finish();
                self.terminate(RelayState::Failed).await;
            }
        }
        self.state
    }

    async fn on_data(&mut self, chunk: &[u8]) {
        for record in self.parser.push(chunk) {
            for event in self.decoder.decode_record(&record) {
                match event {
                    Event::Token(text) => {
                        let frame = self.framing.frame(&text);
                        if self.sink.write(frame).await.is_err() {
                            tracing::info!(tokens = self.tokens, "Client disconnected mid-stream");
                            self.terminate(RelayState::Failed).await;
                            return;
                        }
                        self.tokens += 1;
                    }
                    Event::Done => {
                        self.done_received = true;
                        let frame = self.framing.frame(DONE_SENTINEL);
                        // The stream is over either way; a failed write only
                        // means the client left first.
                        let next = match self.sink.write(frame).await {
                            Ok(()) => RelayState::Done,
                            Err(_) => RelayState::Failed,
                        };
                        self.parser.reset();
                        self.terminate(next).await;
                        return;
                    }
                    Event::Unparseable => {}
                }
            }
        }
    }

    /// Close-once guard: the only place the sink is closed.
    async fn terminate(&mut self, next: RelayState) {
        if self.state.is_terminal() {
            return;
        }
        self.state = next;
        self.sink.close().await;
    }
}

/// Pump an upstream byte stream through the driver until it terminates.
///
/// Each wait for the next chunk is bounded by `idle_timeout` and raced
/// against the sink reporting the client gone. Returning drops
/// `upstream`, which aborts the upstream request if it was still open.
pub async fn drive<S, St, E>(
    driver: &mut RelayDriver<S>,
    upstream: St,
    idle_timeout: Duration,
) -> RelayOutcome
where
    S: Sink,
    St: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    futures::pin_mut!(upstream);

    while !driver.state().is_terminal() {
        let signal = tokio::select! {
            biased;
            _ = driver.sink.closed() => Signal::Disconnect,
            next = tokio::time::timeout(idle_timeout, upstream.next()) => match next {
                Ok(Some(Ok(chunk))) => Signal::Data(chunk),
                Ok(Some(Err(e))) => Signal::Error(e.to_string()),
                Ok(None) => Signal::End,
                Err(_) => Signal::Error(format!("no upstream data for {:?}", idle_timeout)),
            },
        };
        driver.on_signal(signal).await;
    }
    // The transport always reports close last; the guard makes it a no-op.
    driver.on_signal(Signal::Close).await;

    driver.outcome()
}
