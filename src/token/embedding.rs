use std::sync::Arc;

use async_trait::async_trait;

use super::{Counter, TokenError, Tokenizer, Usage};
use crate::protocol::openai_embedding::OpenAiEmbeddingUsage;

/// Usage for an embeddings request: the upstream's report when it sent one,
/// otherwise a tokenizer count of the input.
pub struct EmbeddingTokenCounter {
    input: String,
    reported: Option<OpenAiEmbeddingUsage>,
    tokenizer: Option<Arc<dyn Tokenizer>>,
}

impl EmbeddingTokenCounter {
    #[must_use]
    pub fn new(tokenizer: Option<Arc<dyn Tokenizer>>) -> Self {
        Self {
            input: String::new(),
            reported: None,
            tokenizer,
        }
    }

    pub fn input(&mut self, input: String) {
        self.input = input;
    }

    pub fn embedding(&mut self, usage: OpenAiEmbeddingUsage) {
        self.reported = Some(usage);
    }

    /// # Errors
    ///
    /// [`TokenError::NoEmbeddingUsage`] when there is neither a reported
    /// usage nor a tokenizer.
    pub async fn usage(&self) -> Result<Usage, TokenError> {
        if let Some(reported) = &self.reported {
            return Ok(Usage::from(reported));
        }
        let Some(tokenizer) = &self.tokenizer else {
            return Err(TokenError::NoEmbeddingUsage);
        };
        let tokens = tokenizer.embedding_encode(&self.input).await?;
        Ok(Usage {
            prompt_tokens: tokens,
            completion_tokens: 0,
            total_tokens: tokens,
        })
    }
}

#[async_trait]
impl Counter for EmbeddingTokenCounter {
    async fn usage(&self) -> Result<Usage, TokenError> {
        EmbeddingTokenCounter::usage(self).await
    }
}
