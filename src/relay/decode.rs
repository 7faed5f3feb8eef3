//! Provider event decoding.
//!
//! Turns one complete record from [`FrameParser`](super::frame::FrameParser)
//! into zero or more [`Event`]s. Decoding is infallible by construction:
//! malformed payloads are logged and reported as [`Event::Unparseable`], so
//! one bad record can never affect the records after it.

/// Payload marking the end of an upstream stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Line prefix shared by all supported providers.
pub const DATA_PREFIX: &str = "data: ";

/// JSON pointer to the incremental text of an OpenAI-style chunk.
pub const OPENAI_DELTA_POINTER: &str = "/choices/0/delta/content";

/// One decoded upstream event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Incremental text fragment.
    Token(String),
    /// The provider finished the stream.
    Done,
    /// A data line whose payload could not be interpreted.
    Unparseable,
}

/// Per-provider decoding rules.
#[derive(Debug, Clone)]
pub struct EventDecoder {
    prefix: String,
    token_pointer: String,
}

impl EventDecoder {
    pub fn new(prefix: impl Into<String>, token_pointer: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            token_pointer: token_pointer.into(),
        }
    }

    /// Decoder for OpenAI-compatible `data: {..choices[0].delta.content..}` streams.
    pub fn openai() -> Self {
        Self::new(DATA_PREFIX, OPENAI_DELTA_POINTER)
    }

    /// Decode every relevant line of a record, in order.
    pub fn decode_record(&self, record: &str) -> Vec<Event> {
        record
            .split('\n')
            .filter_map(|line| self.decode_line(line))
            .collect()
    }

    /// Decode a single line. Returns `None` for noise.
    ///
    /// Noise covers blank lines, lines without the event prefix (`event:`,
    /// `id:`, `: keep-alive` comments) and well-formed chunks that carry no
    /// text, such as the initial role-only delta.
    pub fn decode_line(&self, line: &str) -> Option<Event> {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            return None;
        }
        let payload = line.strip_prefix(self.prefix.as_str())?;
        if payload.trim() == DONE_SENTINEL {
            return Some(Event::Done);
        }

        let parsed: serde_json::Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, payload = %payload, "Discarding malformed event payload");
                return Some(Event::Unparseable);
            }
        };

        match parsed.pointer(&self.token_pointer) {
            Some(serde_json::Value::String(text)) if text.is_empty() => None,
            Some(serde_json::Value::String(text)) => Some(Event::Token(text.clone())),
            // Present-but-null content is how providers send non-text deltas.
            Some(serde_json::Value::Null) => None,
            Some(other) => {
                tracing::warn!(value = %other, "Token field is not a string");
                Some(Event::Unparseable)
            }
            None if self.is_contentless_chunk(&parsed) => None,
            None => {
                tracing::warn!(
                    pointer = %self.token_pointer,
                    payload = %payload,
                    "Event payload lacks token field"
                );
                Some(Event::Unparseable)
            }
        }
    }

    /// Whether the chunk is a well-formed chunk that simply has no text:
    /// the parent object of the token field exists (e.g. a role-only
    /// `delta`), or `choices` is an empty array (usage-only final chunk).
    fn is_contentless_chunk(&self, parsed: &serde_json::Value) -> bool {
        let parent = match self.token_pointer.rfind('/') {
            Some(0) | None => return false,
            Some(idx) => &self.token_pointer[..idx],
        };
        if parsed.pointer(parent).is_some_and(|v| v.is_object()) {
            return true;
        }
        parsed
            .get("choices")
            .and_then(|c| c.as_array())
            .is_some_and(|c| c.is_empty())
    }
}

impl Default for EventDecoder {
    fn default() -> Self {
        Self::openai()
    }
}
