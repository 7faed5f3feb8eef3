//! Streaming relay and reframing engine.
//!
//! Upstream SSE bytes flow through [`frame::FrameParser`] into
//! [`decode::EventDecoder`], and [`driver::RelayDriver`] writes the resulting
//! tokens to a [`sink::Sink`] using the outbound [`Framing`].

pub mod decode;
pub mod driver;
pub mod frame;
pub mod sink;

use bytes::Bytes;
use serde::Deserialize;

pub use decode::{Event, EventDecoder};
pub use driver::{drive, RelayDriver, RelayOutcome, RelayState, Signal};
pub use frame::FrameParser;
pub use sink::{ChannelSink, Sink, SinkClosed};

/// Prefix of every outbound frame.
pub const FRAME_PREFIX: &str = "data: ";

/// ASCII record separator, the default outbound delimiter.
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Outbound framing, fixed once per relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Framing {
    /// `data: <token>\u{1e}`. Tokens containing blank lines survive intact.
    #[default]
    RecordSeparator,
    /// `data: <token>\n\n`, plain SSE.
    BlankLine,
}

impl Framing {
    pub fn delimiter(self) -> &'static str {
        match self {
            Framing::RecordSeparator => "\u{1e}",
            Framing::BlankLine => "\n\n",
        }
    }

    /// Frame one token (or the `[DONE]` sentinel).
    pub fn frame(self, token: &str) -> Bytes {
        let delimiter = self.delimiter();
        let mut frame = String::with_capacity(FRAME_PREFIX.len() + token.len() + delimiter.len());
        frame.push_str(FRAME_PREFIX);
        frame.push_str(token);
        frame.push_str(delimiter);
        Bytes::from(frame)
    }
}
