//! Incremental SSE event decoder and frame helpers.
//!
//! Upstream bodies arrive in arbitrary byte slices. [`EventStreamDecoder`]
//! buffers them, cuts complete events at the blank-line terminator and keeps
//! the exact original bytes of every event so callers can forward them
//! untouched.

use super::StreamEvent;
use bytes::{Bytes, BytesMut};
use memchr::memmem;
use smallvec::SmallVec;
use std::sync::LazyLock;

/// Splits a byte stream into complete [`StreamEvent`]s.
///
/// Bytes of an incomplete trailing event stay buffered until a later
/// [`write`](Self::write) completes it. The decoder never interprets the
/// payload; `[DONE]` is just another data line here.
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buffer: BytesMut,
    scan_from: usize,
}

impl EventStreamDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            scan_from: 0,
        }
    }

    /// Append `data` and return every event it completed, in stream order.
    pub fn write(&mut self, data: &[u8]) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        self.write_into(data, &mut out);
        out
    }

    /// Append `data` and push completed events into a caller-provided buffer.
    pub fn write_into(&mut self, data: &[u8], out: &mut Vec<StreamEvent>) {
        if data.is_empty() {
            return;
        }
        self.buffer.extend_from_slice(data);

        while let Some((start, len)) = find_event_terminator_from(&self.buffer, self.scan_from) {
            let raw = self.buffer.split_to(start + len).freeze();
            self.scan_from = 0;
            out.push(parse_event(raw));
        }

        // Keep a small overlap so a terminator split across writes is found.
        self.scan_from = self.buffer.len().saturating_sub(3);
    }

    /// Bytes received but not yet part of a complete event.
    #[must_use]
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Drain the incomplete tail, leaving the decoder empty.
    pub fn take_remaining(&mut self) -> Bytes {
        self.scan_from = 0;
        self.buffer.split().freeze()
    }
}

#[inline]
fn find_event_terminator_from(buffer: &[u8], scan_from: usize) -> Option<(usize, usize)> {
    static LF_LF_FINDER: LazyLock<memmem::Finder<'static>> =
        LazyLock::new(|| memmem::Finder::new(b"\n\n"));
    static CRLF_CRLF_FINDER: LazyLock<memmem::Finder<'static>> =
        LazyLock::new(|| memmem::Finder::new(b"\r\n\r\n"));

    let scan_from = scan_from.min(buffer.len());
    let haystack = &buffer[scan_from..];
    let lf_lf_pos = LF_LF_FINDER.find(haystack).map(|rel| scan_from + rel);
    let crlf_crlf_pos = CRLF_CRLF_FINDER.find(haystack).map(|rel| scan_from + rel);

    match (lf_lf_pos, crlf_crlf_pos) {
        (Some(lf_pos), Some(crlf_pos)) if crlf_pos < lf_pos => Some((crlf_pos, 4)),
        (Some(lf_pos), _) => Some((lf_pos, 2)),
        (None, Some(crlf_pos)) => Some((crlf_pos, 4)),
        (None, None) => None,
    }
}

/// Parse the fields of one complete event.
///
/// `event:` sets the type, `data:` lines are trimmed and joined with `\n`,
/// anything else (comments, `id:`, `retry:`) is ignored.
fn parse_event(raw: Bytes) -> StreamEvent {
    let mut event = None;
    let data = {
        let mut data_lines: SmallVec<[&[u8]; 2]> = SmallVec::new();
        for line in raw.split(|b| *b == b'\n') {
            if let Some(value) = line.strip_prefix(b"data:") {
                data_lines.push(value.trim_ascii());
            } else if let Some(value) = line.strip_prefix(b"event:") {
                event = Some(String::from_utf8_lossy(value.trim_ascii()).into_owned());
            }
        }

        match data_lines.as_slice() {
            [] => Bytes::new(),
            [single] => raw.slice_ref(single),
            lines => Bytes::from(lines.join(&b"\n"[..])),
        }
    };

    StreamEvent { event, data, raw }
}

pub(crate) const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

/// The terminal `data: [DONE]` frame.
#[must_use]
pub fn done_frame() -> Bytes {
    Bytes::from_static(DONE_FRAME)
}

/// Wrap a JSON payload in an unnamed SSE data frame.
#[must_use]
pub fn openai_sse_frame(json: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(json.len() + 8);
    frame.extend_from_slice(b"data: ");
    frame.extend_from_slice(json);
    frame.extend_from_slice(b"\n\n");
    frame.freeze()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const OPENAI_STREAM: &[u8] = b"data: {\"id\":\"c1\",\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n\
: keep-alive\n\n\
event: message\ndata: {\"id\":\"c1\",\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n\
data: {\"id\":\"c1\",\"choices\":[],\"usage\":{\"total_tokens\":7}}\n\n\
data: [DONE]\n\n";

    #[test]
    fn test_decode_simple_data_frame() {
        let mut decoder = EventStreamDecoder::new();
        let events = decoder.write(b"data: hello world\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data.as_ref(), b"hello world");
        assert!(events[0].event.is_none());
        assert_eq!(events[0].raw.as_ref(), b"data: hello world\n\n");
    }

    #[test]
    fn test_decode_named_event() {
        let mut decoder = EventStreamDecoder::new();
        let events = decoder.write(b"event: message_start\ndata: {\"type\":\"message_start\"}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message_start"));
        assert_eq!(events[0].data.as_ref(), b"{\"type\":\"message_start\"}");
    }

    #[test]
    fn test_decode_multiline_data_joined_with_newline() {
        let mut decoder = EventStreamDecoder::new();
        let events = decoder.write(b"data: line1\ndata:line2 \ndata: line3\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data.as_ref(), b"line1\nline2\nline3");
    }

    #[test]
    fn test_decode_multiple_events_in_one_write() {
        let mut decoder = EventStreamDecoder::new();
        let events = decoder.write(b"data: first\n\ndata: second\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data.as_ref(), b"first");
        assert_eq!(events[1].data.as_ref(), b"second");
        assert_eq!(events[1].raw.as_ref(), b"data: second\n\n");
    }

    #[test]
    fn test_decode_event_split_across_writes() {
        let mut decoder = EventStreamDecoder::new();
        assert!(decoder.write(b"data: hel").is_empty());
        assert!(decoder.write(b"lo\n").is_empty());
        assert_eq!(decoder.buffered(), b"data: hello\n");

        let events = decoder.write(b"\ndata: next");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data.as_ref(), b"hello");
        assert_eq!(events[0].raw.as_ref(), b"data: hello\n\n");
        assert_eq!(decoder.buffered(), b"data: next");
    }

    #[test]
    fn test_empty_write_is_a_noop() {
        let mut decoder = EventStreamDecoder::new();
        decoder.write(b"data: partial");
        assert!(decoder.write(b"").is_empty());
        assert_eq!(decoder.buffered(), b"data: partial");
    }

    #[test]
    fn test_event_without_data_line_has_empty_data() {
        let mut decoder = EventStreamDecoder::new();
        let events = decoder.write(b": ping\n\nretry: 10\nid: 4\n\n");
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|event| event.data.is_empty()));
        assert_eq!(events[0].raw.as_ref(), b": ping\n\n");
    }

    #[test]
    fn test_done_payload_is_not_interpreted() {
        let mut decoder = EventStreamDecoder::new();
        let events = decoder.write(b"data: [DONE]\n\n");
        assert_eq!(events.len(), 1);
        assert!(events[0].is_done());
        assert_eq!(events[0].raw.as_ref(), DONE_FRAME);
    }

    #[test]
    fn test_crlf_terminated_event() {
        let mut decoder = EventStreamDecoder::new();
        let events = decoder.write(b"data: a\r\n\r\ndata: b\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data.as_ref(), b"a");
        assert_eq!(events[0].raw.as_ref(), b"data: a\r\n\r\n");
        assert_eq!(events[1].data.as_ref(), b"b");
    }

    #[test]
    fn test_take_remaining_drains_tail() {
        let mut decoder = EventStreamDecoder::new();
        decoder.write(b"data: done\n\ndata: tail");
        assert_eq!(decoder.take_remaining().as_ref(), b"data: tail");
        assert!(decoder.buffered().is_empty());
        assert!(decoder.take_remaining().is_empty());
    }

    #[test]
    fn test_raw_concatenation_reproduces_input() {
        let mut decoder = EventStreamDecoder::new();
        let events = decoder.write(OPENAI_STREAM);
        let joined: Vec<u8> = events.iter().flat_map(|e| e.raw.iter().copied()).collect();
        assert_eq!(joined, OPENAI_STREAM);
        assert_eq!(events.len(), 5);
        assert_eq!(events[2].event.as_deref(), Some("message"));
    }

    #[test]
    fn test_frame_helpers() {
        assert_eq!(done_frame().as_ref(), b"data: [DONE]\n\n");
        assert_eq!(openai_sse_frame(b"{\"a\":1}").as_ref(), b"data: {\"a\":1}\n\n");
    }

    proptest! {
        #[test]
        fn split_points_do_not_change_events(
            mut cuts in proptest::collection::vec(0usize..OPENAI_STREAM.len(), 0..12)
        ) {
            let mut whole = EventStreamDecoder::new();
            let expected = whole.write(OPENAI_STREAM);

            cuts.sort_unstable();
            let mut decoder = EventStreamDecoder::new();
            let mut events = Vec::new();
            let mut start = 0;
            for cut in cuts.into_iter().chain(std::iter::once(OPENAI_STREAM.len())) {
                decoder.write_into(&OPENAI_STREAM[start..cut], &mut events);
                start = cut;
            }

            prop_assert_eq!(events, expected);
            prop_assert!(decoder.buffered().is_empty());
        }
    }
}
