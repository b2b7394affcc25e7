use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use super::TokenError;

/// One message handed to a tokenizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenizerMessage<'a> {
    pub role: &'a str,
    pub content: &'a str,
}

/// Counts tokens the way the serving model does.
#[async_trait]
pub trait Tokenizer: Send + Sync {
    async fn encode(&self, message: TokenizerMessage<'_>) -> Result<i64, TokenError>;
    async fn embedding_encode(&self, input: &str) -> Result<i64, TokenError>;
}

/// Inference server family behind a model endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServingFramework {
    Vllm,
    Tgi,
    #[serde(other)]
    Other,
}

/// Tokenizer backed by the serving engine's own `/tokenize` endpoint.
#[derive(Debug, Clone)]
pub struct HttpTokenizer {
    client: reqwest::Client,
    url: Url,
    model: String,
    framework: ServingFramework,
}

#[derive(Serialize)]
struct VllmTokenizeRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct VllmTokenizeResponse {
    count: i64,
}

#[derive(Serialize)]
struct TgiTokenizeRequest<'a> {
    inputs: &'a str,
}

impl HttpTokenizer {
    #[must_use]
    pub fn new(client: reqwest::Client, url: Url, model: &str, framework: ServingFramework) -> Self {
        Self {
            client,
            url,
            model: model.to_string(),
            framework,
        }
    }

    async fn count(&self, text: &str) -> Result<i64, TokenError> {
        let request = self.client.post(self.url.clone());
        let request = match self.framework {
            ServingFramework::Vllm => request.json(&VllmTokenizeRequest {
                model: &self.model,
                prompt: text,
            }),
            ServingFramework::Tgi => request.json(&TgiTokenizeRequest { inputs: text }),
            ServingFramework::Other => return Err(TokenError::UnsupportedTokenizer),
        };

        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(TokenError::Request(format!(
                "status {}: {}",
                status.as_u16(),
                String::from_utf8_lossy(&body)
            )));
        }

        match self.framework {
            ServingFramework::Vllm => serde_json::from_slice::<VllmTokenizeResponse>(&body)
                .map(|parsed| parsed.count)
                .map_err(|err| TokenError::Decode(err.to_string())),
            _ => serde_json::from_slice::<Vec<serde_json::Value>>(&body)
                .map(|tokens| i64::try_from(tokens.len()).unwrap_or(i64::MAX))
                .map_err(|err| TokenError::Decode(err.to_string())),
        }
    }
}

#[async_trait]
impl Tokenizer for HttpTokenizer {
    async fn encode(&self, message: TokenizerMessage<'_>) -> Result<i64, TokenError> {
        self.count(message.content).await
    }

    async fn embedding_encode(&self, input: &str) -> Result<i64, TokenError> {
        self.count(input).await
    }
}

/// Placeholder for frameworks without a tokenize endpoint. Every call fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedTokenizer;

#[async_trait]
impl Tokenizer for UnsupportedTokenizer {
    async fn encode(&self, _message: TokenizerMessage<'_>) -> Result<i64, TokenError> {
        Err(TokenError::UnsupportedTokenizer)
    }

    async fn embedding_encode(&self, _input: &str) -> Result<i64, TokenError> {
        Err(TokenError::UnsupportedTokenizer)
    }
}

/// Builds the tokenizer matching a model's serving framework.
#[derive(Debug, Clone)]
pub struct TokenizerFactory {
    client: reqwest::Client,
}

impl TokenizerFactory {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// `None` when the model has no framework configured; counters then
    /// rely on upstream-reported usage alone.
    #[must_use]
    pub fn create(
        &self,
        framework: Option<ServingFramework>,
        endpoint: &Url,
        model: &str,
    ) -> Option<Arc<dyn Tokenizer>> {
        let framework = framework?;
        if framework == ServingFramework::Other {
            return Some(Arc::new(UnsupportedTokenizer));
        }

        let mut url = endpoint.clone();
        url.set_path("/tokenize");
        url.set_query(None);
        if url.cannot_be_a_base() {
            warn!(endpoint = %endpoint, "model endpoint cannot host a tokenize route");
            return Some(Arc::new(UnsupportedTokenizer));
        }
        Some(Arc::new(HttpTokenizer::new(
            self.client.clone(),
            url,
            model,
            framework,
        )))
    }
}
