//! Response writers sitting between the upstream body and the client.
//!
//! Every writer consumes upstream bytes through [`ResponseWriter::write`],
//! inspects them and forwards (possibly rewritten) bytes to a
//! [`ResponseSink`]. `write` always reports the full input length as
//! consumed, whatever was actually sent downstream.

pub mod embedding;
pub mod non_stream;
pub mod sink;
pub mod stream;

use std::io;

use async_trait::async_trait;

use crate::compress::CompressError;

pub use embedding::EmbeddingResponseWriter;
pub use non_stream::NonStreamResponseWriter;
pub use sink::{channel_body, ChannelSink, ResponseSink};
pub use stream::{StreamResponseWriter, StreamState};

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// The response was cut short after a block message was sent.
    /// Callers stop copying the upstream body; this is not a failure.
    #[error("sensitive content detected, response terminated")]
    SensitiveContent,
    #[error("downstream write failed: {0}")]
    Downstream(#[from] io::Error),
    #[error(transparent)]
    Encode(#[from] CompressError),
    #[error("failed to serialize replacement body: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[async_trait]
pub trait ResponseWriter: Send {
    /// Consume one slice of the upstream body.
    ///
    /// Returns `data.len()` on success.
    async fn write(&mut self, data: &[u8]) -> Result<usize, WriteError>;

    /// Forward anything still buffered. Called once the upstream body ends.
    async fn finish(&mut self) -> Result<(), WriteError>;
}
