// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Server-Sent Events framing.
//!
//! The framer is byte-level: TCP chunks arrive at arbitrary boundaries, so it
//! accumulates raw bytes and yields complete events delimited by `\n\n`.  UTF-8
//! is only enforced later, when an event's `data:` payload is parsed as JSON.

/// Stateful byte accumulator that extracts `\n\n`-delimited events.
#[derive(Debug, Default)]
pub struct SseFramer {
    buf: Vec<u8>,
}

impl SseFramer {
    pub fn new() -> Self {
        Self { buf: Vec::with_capacity(4096) }
    }

    /// Append raw bytes.  An empty slice is a no-op.
    pub fn feed(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        // Vec doubles capacity on growth; the tail past the last complete
        // event is retained for the next feed.
        self.buf.extend_from_slice(bytes);
    }

    /// Extract the next complete event (everything before the first `\n\n`),
    /// consuming it and the delimiter.  Returns `None` when no complete event
    /// is buffered yet.
    pub fn take_event(&mut self) -> Option<Vec<u8>> {
        let pos = self.buf.windows(2).position(|w| w == b"\n\n")?;
        let event = self.buf[..pos].to_vec();
        self.buf.drain(..pos + 2);
        Some(event)
    }

    /// Bytes currently buffered (incomplete tail).
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_feed_is_noop() {
        let mut f = SseFramer::new();
        f.feed(b"");
        assert_eq!(f.pending(), 0);
        assert!(f.take_event().is_none());
    }

    #[test]
    fn no_event_until_double_newline() {
        let mut f = SseFramer::new();
        f.feed(b"data: {\"x\":1}");
        assert!(f.take_event().is_none());
        f.feed(b"\n");
        assert!(f.take_event().is_none());
        f.feed(b"\n");
        assert_eq!(f.take_event().unwrap(), b"data: {\"x\":1}");
    }

    #[test]
    fn event_split_at_arbitrary_byte_boundary() {
        let mut f = SseFramer::new();
        f.feed(b"data: hel");
        f.feed(b"lo\n\ndata: wor");
        assert_eq!(f.take_event().unwrap(), b"data: hello");
        assert!(f.take_event().is_none());
        f.feed(b"ld\n\n");
        assert_eq!(f.take_event().unwrap(), b"data: world");
    }

    #[test]
    fn multiple_events_in_one_feed() {
        let mut f = SseFramer::new();
        f.feed(b"a\n\nb\n\nc\n\n");
        assert_eq!(f.take_event().unwrap(), b"a");
        assert_eq!(f.take_event().unwrap(), b"b");
        assert_eq!(f.take_event().unwrap(), b"c");
        assert!(f.take_event().is_none());
        assert_eq!(f.pending(), 0);
    }

    #[test]
    fn tail_bytes_are_retained() {
        let mut f = SseFramer::new();
        f.feed(b"one\n\npartial");
        assert_eq!(f.take_event().unwrap(), b"one");
        assert_eq!(f.pending(), 7);
    }

    #[test]
    fn delimiter_split_across_feeds() {
        let mut f = SseFramer::new();
        f.feed(b"event\n");
        assert!(f.take_event().is_none());
        f.feed(b"\nnext");
        assert_eq!(f.take_event().unwrap(), b"event");
    }

    #[test]
    fn empty_event_between_delimiters() {
        let mut f = SseFramer::new();
        f.feed(b"\n\n");
        assert_eq!(f.take_event().unwrap(), b"");
    }

    #[test]
    fn byte_level_not_utf8_dependent() {
        let mut f = SseFramer::new();
        // An invalid UTF-8 byte must pass through the framer untouched.
        f.feed(&[0xFF, b'\n', b'\n']);
        assert_eq!(f.take_event().unwrap(), vec![0xFF]);
    }
}
