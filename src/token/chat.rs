use std::sync::Arc;

use async_trait::async_trait;

use super::{Counter, TokenError, Tokenizer, TokenizerMessage, Usage};
use crate::protocol::openai_chat::{OpenAiChatResponse, OpenAiMessage, OpenAiStreamChunk};

/// Tokens a chat template adds around the prompt messages.
const CHAT_TEMPLATE_OVERHEAD_TOKENS: i64 = 3;

/// Collects one chat request's prompts and its completion (full body or
/// streamed chunks) and resolves them to a [`Usage`].
pub struct ChatTokenCounter {
    prompts: Vec<OpenAiMessage>,
    completion: Option<OpenAiChatResponse>,
    chunks: Vec<OpenAiStreamChunk>,
    tokenizer: Option<Arc<dyn Tokenizer>>,
}

impl std::fmt::Debug for ChatTokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatTokenCounter")
            .field("prompts", &self.prompts.len())
            .field("completion", &self.completion.is_some())
            .field("chunks", &self.chunks.len())
            .field("tokenizer", &self.tokenizer.is_some())
            .finish()
    }
}

impl ChatTokenCounter {
    #[must_use]
    pub fn new(tokenizer: Option<Arc<dyn Tokenizer>>) -> Self {
        Self {
            prompts: Vec::new(),
            completion: None,
            chunks: Vec::new(),
            tokenizer,
        }
    }

    pub fn append_prompts(&mut self, prompts: impl IntoIterator<Item = OpenAiMessage>) {
        self.prompts.extend(prompts);
    }

    /// Record the full non-stream response. Its usage wins over any chunks.
    pub fn completion(&mut self, completion: OpenAiChatResponse) {
        self.completion = Some(completion);
    }

    pub fn append_completion_chunk(&mut self, chunk: OpenAiStreamChunk) {
        self.chunks.push(chunk);
    }

    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Resolve the request's usage.
    ///
    /// Order of preference:
    /// 1. usage of the recorded non-stream response, verbatim
    /// 2. the most recent streamed chunk reporting `total_tokens > 0`
    /// 3. tokenizer estimate: generated text (content plus reasoning of the
    ///    first choice of every chunk) and every prompt message, plus the
    ///    chat template overhead on the prompt side
    ///
    /// # Errors
    ///
    /// [`TokenError::NoUsage`] when nothing was reported and no
    /// tokenizer is configured; tokenizer failures are passed through.
    pub async fn usage(&self) -> Result<Usage, TokenError> {
        if let Some(completion) = &self.completion {
            return Ok(completion.usage.as_ref().map(Usage::from).unwrap_or_default());
        }

        if let Some(reported) = self
            .chunks
            .iter()
            .rev()
            .filter_map(|chunk| chunk.usage.as_ref())
            .find(|usage| usage.total_tokens > 0)
        {
            return Ok(Usage::from(reported));
        }

        let Some(tokenizer) = &self.tokenizer else {
            return Err(TokenError::NoUsage);
        };

        let mut generated = String::new();
        for choice in self.chunks.iter().filter_map(|chunk| chunk.choices.first()) {
            generated.push_str(choice.delta.content());
            generated.push_str(choice.delta.reasoning_content());
        }
        let completion_tokens = tokenizer
            .encode(TokenizerMessage {
                role: "assistant",
                content: &generated,
            })
            .await?;

        let mut prompt_tokens = 0;
        for message in &self.prompts {
            let content = message.text_content();
            prompt_tokens += tokenizer
                .encode(TokenizerMessage {
                    role: &message.role,
                    content: &content,
                })
                .await?;
        }
        prompt_tokens += CHAT_TEMPLATE_OVERHEAD_TOKENS;

        Ok(Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        })
    }
}

#[async_trait]
impl Counter for ChatTokenCounter {
    async fn usage(&self) -> Result<Usage, TokenError> {
        ChatTokenCounter::usage(self).await
    }
}
