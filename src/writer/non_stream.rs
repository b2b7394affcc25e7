use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use super::{ResponseSink, ResponseWriter, WriteError};
use crate::compress::{self, CompressError, ContentEncoding};
use crate::moderation::{CheckResult, Moderation};
use crate::protocol::openai_chat::OpenAiChatResponse;
use crate::token::ChatTokenCounter;

enum BufferedBody {
    Incomplete,
    Corrupt(CompressError),
    Complete(Box<OpenAiChatResponse>),
}

/// Moderating writer for buffered chat completion bodies.
///
/// Bytes are held back until they decode (per `Content-Encoding`) and parse
/// as one completion. The completion is then moderated and forwarded as a
/// whole: original bytes when clean, a re-encoded block body when flagged.
pub struct NonStreamResponseWriter<S> {
    sink: S,
    moderation: Arc<Moderation>,
    counter: ChatTokenCounter,
    encoding: ContentEncoding,
    buffer: BytesMut,
    max_buffer_bytes: usize,
    passthrough: bool,
}

impl<S: ResponseSink> NonStreamResponseWriter<S> {
    #[must_use]
    pub fn new(
        sink: S,
        moderation: Arc<Moderation>,
        counter: ChatTokenCounter,
        encoding: ContentEncoding,
        max_buffer_bytes: usize,
    ) -> Self {
        Self {
            sink,
            moderation,
            counter,
            encoding,
            buffer: BytesMut::new(),
            max_buffer_bytes,
            passthrough: false,
        }
    }

    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn counter(&self) -> &ChatTokenCounter {
        &self.counter
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_parts(self) -> (S, ChatTokenCounter) {
        (self.sink, self.counter)
    }

    /// Forward whatever is still buffered, untouched.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError::Downstream`] when the sink rejects the bytes.
    pub async fn clear_buffer(&mut self) -> Result<(), WriteError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let raw = self.buffer.split().freeze();
        self.forward(raw).await
    }

    async fn forward(&mut self, bytes: Bytes) -> Result<(), WriteError> {
        self.sink.write_all(bytes).await?;
        self.sink.flush().await?;
        Ok(())
    }

    fn parse_buffer(&self) -> BufferedBody {
        let decoded = match compress::decode(self.encoding, &self.buffer) {
            Ok(decoded) => decoded,
            Err(CompressError::Incomplete(_)) => return BufferedBody::Incomplete,
            Err(err) => return BufferedBody::Corrupt(err),
        };
        match serde_json::from_slice(&decoded) {
            Ok(response) => BufferedBody::Complete(Box::new(response)),
            Err(_) => BufferedBody::Incomplete,
        }
    }

    async fn complete(&mut self, response: OpenAiChatResponse) -> Result<(), WriteError> {
        self.passthrough = true;
        let raw = self.buffer.split().freeze();

        if response.choices.is_empty() {
            self.counter.completion(response);
            return self.forward(raw).await;
        }

        let verdict = match self.moderation.check_chat_non_stream_response(&response).await {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(error = %err, "response moderation unavailable, passing body through");
                CheckResult::clean()
            }
        };
        if !verdict.is_sensitive {
            self.counter.completion(response);
            return self.forward(raw).await;
        }

        debug!(reason = %verdict.reason, "blocking sensitive completion");
        let mut blocked = response.clone();
        blocked.block_first_choice();
        self.counter.completion(response);
        let body = serde_json::to_vec(&blocked)?;
        let encoded = Bytes::from(compress::encode(self.encoding, &body)?.into_owned());
        self.forward(encoded).await
    }
}

#[async_trait]
impl<S: ResponseSink> ResponseWriter for NonStreamResponseWriter<S> {
    async fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        if data.is_empty() {
            return Ok(0);
        }
        if self.passthrough {
            self.forward(Bytes::copy_from_slice(data)).await?;
            return Ok(data.len());
        }

        self.buffer.extend_from_slice(data);
        if self.buffer.len() > self.max_buffer_bytes {
            warn!(
                buffered = self.buffer.len(),
                limit = self.max_buffer_bytes,
                "completion body exceeds buffer limit, forwarding without moderation"
            );
            self.passthrough = true;
            self.clear_buffer().await?;
            return Ok(data.len());
        }

        match self.parse_buffer() {
            BufferedBody::Incomplete => {}
            BufferedBody::Corrupt(err) => {
                warn!(error = %err, encoding = self.encoding.as_str(), "undecodable completion body, forwarding as-is");
                self.passthrough = true;
                self.clear_buffer().await?;
            }
            BufferedBody::Complete(response) => self.complete(*response).await?,
        }
        Ok(data.len())
    }

    async fn finish(&mut self) -> Result<(), WriteError> {
        self.clear_buffer().await
    }
}
