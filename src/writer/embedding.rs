use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tracing::debug;

use super::{ResponseSink, ResponseWriter, WriteError};
use crate::compress::{self, CompressError, ContentEncoding};
use crate::protocol::openai_embedding::OpenAiEmbeddingResponse;
use crate::token::EmbeddingTokenCounter;

/// Pass-through writer for embedding responses that picks up the reported
/// usage on the way.
///
/// Bytes go downstream as soon as they arrive. A copy is kept only until
/// the body parses; after that, or once the copy outgrows the limit, the
/// writer stops looking.
pub struct EmbeddingResponseWriter<S> {
    sink: S,
    counter: EmbeddingTokenCounter,
    encoding: ContentEncoding,
    copy: BytesMut,
    max_buffer_bytes: usize,
    inspecting: bool,
}

impl<S: ResponseSink> EmbeddingResponseWriter<S> {
    #[must_use]
    pub fn new(
        sink: S,
        counter: EmbeddingTokenCounter,
        encoding: ContentEncoding,
        max_buffer_bytes: usize,
    ) -> Self {
        Self {
            sink,
            counter,
            encoding,
            copy: BytesMut::new(),
            max_buffer_bytes,
            inspecting: true,
        }
    }

    pub fn into_parts(self) -> (S, EmbeddingTokenCounter) {
        (self.sink, self.counter)
    }

    fn inspect(&mut self, data: &[u8]) {
        if self.copy.len() + data.len() > self.max_buffer_bytes {
            debug!(limit = self.max_buffer_bytes, "embedding body too large to inspect");
            self.stop_inspecting();
            return;
        }
        self.copy.extend_from_slice(data);

        let decoded = match compress::decode(self.encoding, &self.copy) {
            Ok(decoded) => decoded,
            Err(CompressError::Incomplete(_)) => return,
            Err(err) => {
                debug!(error = %err, "embedding body does not decode");
                self.stop_inspecting();
                return;
            }
        };
        let Ok(response) = serde_json::from_slice::<OpenAiEmbeddingResponse>(&decoded) else {
            return;
        };
        if let Some(usage) = response.usage {
            self.counter.embedding(usage);
        }
        self.stop_inspecting();
    }

    fn stop_inspecting(&mut self) {
        self.inspecting = false;
        self.copy = BytesMut::new();
    }
}

#[async_trait]
impl<S: ResponseSink> ResponseWriter for EmbeddingResponseWriter<S> {
    async fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        if data.is_empty() {
            return Ok(0);
        }
        self.sink.write_all(Bytes::copy_from_slice(data)).await?;
        self.sink.flush().await?;
        if self.inspecting {
            self.inspect(data);
        }
        Ok(data.len())
    }

    async fn finish(&mut self) -> Result<(), WriteError> {
        self.stop_inspecting();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{TokenError, Usage};

    const BODY: &str = r#"{"object":"list","data":[{"object":"embedding","index":0,"embedding":[0.1,0.2]}],"model":"bge","usage":{"prompt_tokens":7,"total_tokens":7}}"#;

    #[tokio::test]
    async fn test_forwards_immediately_and_records_usage() {
        let mut writer = EmbeddingResponseWriter::new(
            Vec::new(),
            EmbeddingTokenCounter::new(None),
            ContentEncoding::Identity,
            1024,
        );
        let (head, tail) = BODY.as_bytes().split_at(30);

        writer.write(head).await.unwrap();
        assert_eq!(writer.sink.as_slice(), head);
        writer.write(tail).await.unwrap();
        writer.finish().await.unwrap();

        let (sink, counter) = writer.into_parts();
        assert_eq!(sink, BODY.as_bytes());
        assert_eq!(
            counter.usage().await.unwrap(),
            Usage {
                prompt_tokens: 7,
                completion_tokens: 0,
                total_tokens: 7
            }
        );
    }

    #[tokio::test]
    async fn test_deflate_body_is_inspected_after_decoding() {
        let compressed = compress::encode(ContentEncoding::Deflate, BODY.as_bytes())
            .unwrap()
            .into_owned();
        let mut writer = EmbeddingResponseWriter::new(
            Vec::new(),
            EmbeddingTokenCounter::new(None),
            ContentEncoding::Deflate,
            1024,
        );
        for piece in compressed.chunks(16) {
            writer.write(piece).await.unwrap();
        }

        let (sink, counter) = writer.into_parts();
        assert_eq!(sink, compressed);
        assert_eq!(counter.usage().await.unwrap().total_tokens, 7);
    }

    #[tokio::test]
    async fn test_oversized_body_is_forwarded_without_usage() {
        let mut writer = EmbeddingResponseWriter::new(
            Vec::new(),
            EmbeddingTokenCounter::new(None),
            ContentEncoding::Identity,
            8,
        );
        writer.write(BODY.as_bytes()).await.unwrap();

        let (sink, counter) = writer.into_parts();
        assert_eq!(sink, BODY.as_bytes());
        assert!(matches!(
            counter.usage().await,
            Err(TokenError::NoEmbeddingUsage)
        ));
    }
}
