//! Token usage accounting for chat and embedding responses.
//!
//! Upstream-reported usage is authoritative. A [`Tokenizer`] is only asked
//! to count when the upstream reported nothing.

pub mod chat;
pub mod embedding;
pub mod tokenizer;

pub use chat::ChatTokenCounter;
pub use embedding::EmbeddingTokenCounter;
pub use tokenizer::{
    HttpTokenizer, ServingFramework, Tokenizer, TokenizerFactory, TokenizerMessage,
    UnsupportedTokenizer,
};

use async_trait::async_trait;
use serde::Serialize;

use crate::protocol::openai_chat::OpenAiUsage;
use crate::protocol::openai_embedding::OpenAiEmbeddingUsage;

/// Token totals for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

impl From<&OpenAiUsage> for Usage {
    fn from(usage: &OpenAiUsage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

impl From<&OpenAiEmbeddingUsage> for Usage {
    fn from(usage: &OpenAiEmbeddingUsage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: 0,
            total_tokens: usage.total_tokens,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("no usage found in completion, and tokenizer not set")]
    NoUsage,
    #[error("no usage found in embedding response, and tokenizer not set")]
    NoEmbeddingUsage,
    #[error("tokenizer is not supported for this model")]
    UnsupportedTokenizer,
    #[error("tokenizer request failed: {0}")]
    Request(String),
    #[error("tokenizer returned an invalid response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for TokenError {
    fn from(err: reqwest::Error) -> Self {
        TokenError::Request(err.to_string())
    }
}

/// Anything that can report the usage of a finished request.
#[async_trait]
pub trait Counter: Send + Sync {
    async fn usage(&self) -> Result<Usage, TokenError>;
}
