//! `OpenAI` Embeddings wire types.

use serde::{Deserialize, Serialize};

use super::openai_chat::WireExtensions;

/// `OpenAI` Embeddings request wire type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenAiEmbeddingRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub input: EmbeddingInput,
    #[serde(flatten)]
    pub extra: WireExtensions,
}

/// Embedding input: one string, a batch of strings, or pre-tokenized ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
    Text(String),
    Batch(Vec<String>),
    Other(serde_json::Value),
}

impl Default for EmbeddingInput {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl EmbeddingInput {
    /// Text used for local token estimation; batches are joined with `\n`.
    #[must_use]
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Batch(items) => items.join("\n"),
            Self::Other(_) => String::new(),
        }
    }
}

/// Usage block of an embeddings response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAiEmbeddingUsage {
    #[serde(default)]
    pub prompt_tokens: i64,
    #[serde(default)]
    pub total_tokens: i64,
}

/// The slice of an embeddings response the gateway reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAiEmbeddingResponse {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub usage: Option<OpenAiEmbeddingUsage>,
}
