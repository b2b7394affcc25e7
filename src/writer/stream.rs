use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use super::{ResponseSink, ResponseWriter, WriteError};
use crate::compress::{ContentEncoding, StreamDecoder};
use crate::moderation::{CheckResult, Moderation};
use crate::protocol::openai_chat::OpenAiStreamChunk;
use crate::stream::{done_frame, openai_sse_frame, EventStreamDecoder, StreamEvent};
use crate::token::ChatTokenCounter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Receiving,
    /// `[DONE]` was forwarded or the stream was blocked. Further writes are
    /// accepted and dropped.
    Done,
}

/// Moderating writer for SSE chat completion streams.
///
/// Events are forwarded one by one, in arrival order, and flushed right
/// away. Each text delta is checked before its bytes leave the gateway.
///
/// A compressed upstream body is decoded before event parsing and the
/// client receives the plain stream.
pub struct StreamResponseWriter<S> {
    sink: S,
    body_decoder: StreamDecoder,
    decoder: EventStreamDecoder,
    moderation: Arc<Moderation>,
    counter: ChatTokenCounter,
    session_id: String,
    state: StreamState,
    pending: Vec<StreamEvent>,
}

impl<S: ResponseSink> StreamResponseWriter<S> {
    #[must_use]
    pub fn new(sink: S, moderation: Arc<Moderation>, counter: ChatTokenCounter) -> Self {
        Self {
            sink,
            body_decoder: StreamDecoder::new(ContentEncoding::Identity),
            decoder: EventStreamDecoder::new(),
            moderation,
            counter,
            session_id: uuid::Uuid::new_v4().simple().to_string(),
            state: StreamState::Receiving,
            pending: Vec::new(),
        }
    }

    /// Decode the upstream body with `encoding` before parsing events.
    #[must_use]
    pub fn with_encoding(mut self, encoding: ContentEncoding) -> Self {
        self.body_decoder = StreamDecoder::new(encoding);
        self
    }

    /// Id grouping this response's delta checks on the moderation service.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn state(&self) -> StreamState {
        self.state
    }

    #[must_use]
    pub fn counter(&self) -> &ChatTokenCounter {
        &self.counter
    }

    /// Direct access to the underlying sink, bypassing the decoder.
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_parts(self) -> (S, ChatTokenCounter) {
        (self.sink, self.counter)
    }

    async fn forward(&mut self, bytes: Bytes) -> Result<(), WriteError> {
        self.sink.write_all(bytes).await?;
        self.sink.flush().await?;
        Ok(())
    }

    async fn handle_event(&mut self, event: StreamEvent) -> Result<(), WriteError> {
        if event.data.is_empty() {
            return self.forward(event.raw).await;
        }
        if event.is_done() {
            self.state = StreamState::Done;
            return self.forward(event.raw).await;
        }

        let chunk: OpenAiStreamChunk = match serde_json::from_slice(&event.data) {
            Ok(chunk) => chunk,
            Err(err) => {
                debug!(session_id = %self.session_id, error = %err, "forwarding unparsable stream event");
                return self.forward(event.raw).await;
            }
        };

        let verdict = match self
            .moderation
            .check_chat_stream_response(&chunk, &self.session_id)
            .await
        {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(
                    session_id = %self.session_id,
                    error = %err,
                    "stream moderation unavailable, passing chunk through"
                );
                CheckResult::clean()
            }
        };

        if !verdict.is_sensitive {
            self.counter.append_completion_chunk(chunk);
            return self.forward(event.raw).await;
        }

        debug!(session_id = %self.session_id, reason = %verdict.reason, "blocking sensitive stream chunk");
        let replacement = serde_json::to_vec(&chunk.blocked_replacement())?;
        self.counter.append_completion_chunk(chunk);
        self.state = StreamState::Done;
        self.forward(openai_sse_frame(&replacement)).await?;
        self.forward(done_frame()).await?;
        Err(WriteError::SensitiveContent)
    }
}

#[async_trait]
impl<S: ResponseSink> ResponseWriter for StreamResponseWriter<S> {
    async fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        if self.state == StreamState::Done {
            return Ok(data.len());
        }

        let plain = match self.body_decoder.decode(data) {
            Ok(plain) => plain,
            Err(err) => {
                warn!(session_id = %self.session_id, error = %err, "stream body does not decode");
                self.state = StreamState::Done;
                return Err(err.into());
            }
        };

        let mut events = std::mem::take(&mut self.pending);
        self.decoder.write_into(&plain, &mut events);

        let mut outcome = Ok(());
        for event in events.drain(..) {
            outcome = self.handle_event(event).await;
            if outcome.is_err() || self.state == StreamState::Done {
                break;
            }
        }
        self.pending = events;

        outcome.map(|()| data.len())
    }

    async fn finish(&mut self) -> Result<(), WriteError> {
        if self.state == StreamState::Receiving {
            self.state = StreamState::Done;
            let tail = self.decoder.take_remaining();
            if !tail.is_empty() {
                self.forward(tail).await?;
            }
        }
        Ok(())
    }
}
