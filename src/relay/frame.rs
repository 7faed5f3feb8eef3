//! Delimited frame parsing.
//!
//! Provides [`FrameParser`] for splitting an upstream byte stream into
//! complete event records. Handles TCP chunk boundary reassembly: a record is
//! only emitted once its full separator has been observed, and the separator
//! itself may straddle two chunks.

/// Record separator used by SSE-style upstream providers (a blank line).
pub const DEFAULT_SEPARATOR: &[u8; 2] = b"\n\n";

/// Incremental splitter over a chunked byte stream.
///
/// Buffers raw bytes rather than text so a multi-byte UTF-8 sequence split
/// across two chunks is decoded intact once the record completes.
pub struct FrameParser {
    buffer: Vec<u8>,
    separator: [u8; 2],
    /// Offset from which the next separator search starts. Everything before
    /// it is known to contain no separator.
    scan_from: usize,
}

impl FrameParser {
    /// Create a parser splitting on a blank line.
    pub fn new() -> Self {
        Self::with_separator(*DEFAULT_SEPARATOR)
    }

    /// Create a parser splitting on a custom two-byte separator.
    pub fn with_separator(separator: [u8; 2]) -> Self {
        Self {
            buffer: Vec::new(),
            separator,
            scan_from: 0,
        }
    }

    /// Feed one chunk and return every record it completes, in arrival order.
    ///
    /// Incomplete trailing data stays buffered for the next call.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        if chunk.is_empty() {
            return Vec::new();
        }
        self.buffer.extend_from_slice(chunk);

        let mut records = Vec::new();
        let mut start = 0;
        let mut pos = self.scan_from;

        while let Some(offset) = self.buffer[pos..]
            .windows(2)
            .position(|w| w == self.separator)
        {
            let end = pos + offset;
            records.push(String::from_utf8_lossy(&self.buffer[start..end]).into_owned());
            start = end + 2;
            pos = start;
        }

        self.buffer.drain(..start);
        // The last byte may be the first half of a separator.
        self.scan_from = self.buffer.len().saturating_sub(1);
        records
    }

    /// Number of bytes currently buffered.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop buffered data and return how many bytes were discarded.
    ///
    /// Called at end of stream: an unterminated remainder can never become a
    /// complete record.
    pub fn finish(&mut self) -> usize {
        let discarded = self.buffer.len();
        if discarded > 0 {
            tracing::debug!(bytes = discarded, "Discarding unterminated trailing data");
        }
        self.reset();
        discarded
    }

    /// Clear all state so the parser can serve a new stream.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.scan_from = 0;
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build SSE data from event lines, then split at the given byte positions.
    ///
    /// Each event string is appended with `\n\n`. The resulting byte buffer is
    /// split at the specified positions to simulate TCP chunk boundaries.
    fn split_sse_at_positions(events: &[&str], split_positions: &[usize]) -> Vec<Vec<u8>> {
        let full: Vec<u8> = events
            .iter()
            .flat_map(|e| format!("{}\n\n", e).into_bytes())
            .collect();

        let mut chunks = Vec::new();
        let mut prev = 0;
        for &pos in split_positions {
            if pos > prev && pos < full.len() {
                chunks.push(full[prev..pos].to_vec());
                prev = pos;
            }
        }
        chunks.push(full[prev..].to_vec());
        chunks
    }

    fn collect(chunks: &[Vec<u8>]) -> Vec<String> {
        let mut parser = FrameParser::new();
        chunks.iter().flat_map(|c| parser.push(c)).collect()
    }

    const EVENTS: [&str; 3] = [
        r#"data: {"choices":[{"delta":{"content":"He"}}]}"#,
        r#"data: {"choices":[{"delta":{"content":"llo"}}]}"#,
        "data: [DONE]",
    ];

    #[test]
    fn test_single_chunk_multiple_records() {
        let chunks = split_sse_at_positions(&EVENTS, &[]);
        assert_eq!(chunks.len(), 1);

        let records = collect(&chunks);
        assert_eq!(records, EVENTS.to_vec());
    }

    #[test]
    fn test_split_invariance_every_single_position() {
        let total: usize = EVENTS.iter().map(|e| e.len() + 2).sum();
        for pos in 1..total {
            let chunks = split_sse_at_positions(&EVENTS, &[pos]);
            assert_eq!(collect(&chunks), EVENTS.to_vec(), "split at {}", pos);
        }
    }

    #[test]
    fn test_split_invariance_byte_by_byte() {
        let total: usize = EVENTS.iter().map(|e| e.len() + 2).sum();
        let positions: Vec<usize> = (1..total).collect();
        let chunks = split_sse_at_positions(&EVENTS, &positions);
        assert_eq!(chunks.len(), total);
        assert_eq!(collect(&chunks), EVENTS.to_vec());
    }

    #[test]
    fn test_separator_straddles_chunks() {
        let mut parser = FrameParser::new();
        assert!(parser.push(b"data: hi\n").is_empty());
        assert_eq!(parser.pending(), 9);
        assert_eq!(parser.push(b"\n"), vec!["data: hi".to_string()]);
        assert_eq!(parser.pending(), 0);
    }

    #[test]
    fn test_empty_chunk_is_noop() {
        let mut parser = FrameParser::new();
        assert!(parser.push(b"data: a").is_empty());
        assert!(parser.push(b"").is_empty());
        assert_eq!(parser.pending(), 7);
        assert_eq!(parser.push(b"\n\n"), vec!["data: a".to_string()]);
    }

    #[test]
    fn test_record_not_emitted_before_separator() {
        let mut parser = FrameParser::new();
        assert!(parser.push(b"data: one\ndata: two\n").is_empty());
        assert_eq!(
            parser.push(b"\ndata: three"),
            vec!["data: one\ndata: two".to_string()]
        );
        assert_eq!(parser.pending(), "data: three".len());
    }

    #[test]
    fn test_finish_discards_unterminated_remainder() {
        let mut parser = FrameParser::new();
        assert_eq!(parser.push(b"data: a\n\ndata: partial"), vec!["data: a"]);
        assert_eq!(parser.finish(), "data: partial".len());
        assert_eq!(parser.pending(), 0);
    }

    #[test]
    fn test_multibyte_utf8_split_across_chunks() {
        let full = "data: caf\u{e9} \u{1f600}\n\n".as_bytes().to_vec();
        // Split inside the 4-byte emoji.
        let cut = full.len() - 4;
        let mut parser = FrameParser::new();
        assert!(parser.push(&full[..cut]).is_empty());
        assert_eq!(parser.push(&full[cut..]), vec!["data: caf\u{e9} \u{1f600}"]);
    }

    #[test]
    fn test_custom_separator() {
        let mut parser = FrameParser::with_separator(*b"\x1e\x1e");
        assert_eq!(parser.push(b"a\x1e\x1eb\x1e"), vec!["a".to_string()]);
        assert_eq!(parser.push(b"\x1e"), vec!["b".to_string()]);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut parser = FrameParser::new();
        parser.push(b"data: stale\n");
        parser.reset();
        assert_eq!(parser.pending(), 0);
        // A lone newline must not complete the discarded partial separator.
        assert!(parser.push(b"\n").is_empty());
    }
}
