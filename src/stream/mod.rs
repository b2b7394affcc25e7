pub mod sse;

pub use sse::{done_frame, openai_sse_frame, EventStreamDecoder};

use bytes::Bytes;

const DONE_PAYLOAD: &[u8] = b"[DONE]";

/// One complete server-sent event cut from an upstream body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamEvent {
    /// Value of the `event:` field, if present.
    pub event: Option<String>,
    /// Trimmed `data:` payloads joined with `\n`.
    pub data: Bytes,
    /// Exact original bytes including the blank-line terminator.
    pub raw: Bytes,
}

impl StreamEvent {
    /// Whether the payload is exactly the `[DONE]` sentinel.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.data.as_ref() == DONE_PAYLOAD
    }
}
