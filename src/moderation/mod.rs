//! Moderation gate.
//!
//! Every unit of generated output (a streamed delta or a buffered body) and
//! every incoming prompt can be sent to a remote moderation service. The gate
//! itself only reports verdicts; callers decide what to substitute. Callers
//! treat any [`ModerationError`] as "not sensitive".

pub mod cache;
pub mod client;

pub use cache::TtlCache;
pub use client::{ModerationHttpClient, ModerationService};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::ModerationConfig;
use crate::protocol::openai_chat::{OpenAiChatResponse, OpenAiMessage, OpenAiStreamChunk};

/// Longest text sent to the service in one prompt check.
const MAX_CONTENT_LENGTH: usize = 2000;
const SLIDING_WINDOW_SIZE: usize = 2000;
const PROMPT_CACHE_PREFIX: &str = "moderation:prompt:";

/// Verdict returned by the moderation service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    #[serde(default)]
    pub is_sensitive: bool,
    #[serde(default)]
    pub reason: String,
}

impl CheckResult {
    #[must_use]
    pub fn clean() -> Self {
        Self::default()
    }
}

/// Moderation scenario, sent to the service as a string tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scenario {
    LlmQueryModeration,
    LlmResponseModeration,
    ChatDetection,
}

impl Scenario {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LlmQueryModeration => "llm_query_moderation",
            Self::LlmResponseModeration => "llm_response_moderation",
            Self::ChatDetection => "chat_detection",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModerationError {
    #[error("moderation request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("moderation service returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("moderation response is invalid: {0}")]
    Decode(String),
    #[error("moderation check timed out after {0:?}")]
    Timeout(Duration),
}

/// Text of a streamed chunk that should be moderated, or `None` to skip it.
///
/// Non-blank content is always checked, whatever else the delta carries.
/// Otherwise chunks without choices, tool-call deltas and whitespace-only
/// deltas are skipped, and reasoning text is checked when present.
#[must_use]
pub fn moderation_text(chunk: &OpenAiStreamChunk) -> Option<&str> {
    let delta = &chunk.choices.first()?.delta;
    let content = delta.content();
    if !content.trim().is_empty() {
        return Some(content);
    }
    if delta.has_tool_call() {
        return None;
    }
    let reasoning = delta.reasoning_content();
    (!reasoning.trim().is_empty()).then_some(reasoning)
}

/// Shared moderation gate.
///
/// A gate without a service is disabled: every check passes without I/O.
pub struct Moderation {
    service: Option<Arc<dyn ModerationService>>,
    prompt_cache: Option<TtlCache<CheckResult>>,
    timeout: Duration,
}

impl std::fmt::Debug for Moderation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Moderation")
            .field("enabled", &self.is_enabled())
            .field("prompt_cache", &self.prompt_cache.as_ref().map(TtlCache::len))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Moderation {
    #[must_use]
    pub fn new(
        service: Arc<dyn ModerationService>,
        prompt_cache: Option<TtlCache<CheckResult>>,
        timeout: Duration,
    ) -> Self {
        Self {
            service: Some(service),
            prompt_cache,
            timeout,
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self {
            service: None,
            prompt_cache: None,
            timeout: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn from_config(config: &ModerationConfig, client: reqwest::Client) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        let cache = (config.cache_max_entries > 0).then(|| {
            TtlCache::new(
                Duration::from_secs(config.cache_ttl_secs),
                config.cache_max_entries,
            )
        });
        Self::new(
            Arc::new(ModerationHttpClient::new(client, &config.endpoint)),
            cache,
            Duration::from_millis(config.timeout_ms),
        )
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.service.is_some()
    }

    async fn bounded<F>(&self, check: F) -> Result<CheckResult, ModerationError>
    where
        F: Future<Output = Result<CheckResult, ModerationError>> + Send,
    {
        tokio::time::timeout(self.timeout, check)
            .await
            .map_err(|_| ModerationError::Timeout(self.timeout))?
    }

    /// Check arbitrary text under `scenario`.
    ///
    /// # Errors
    ///
    /// Transport, status, decode and timeout failures of the service call.
    pub async fn check_text(
        &self,
        scenario: Scenario,
        text: &str,
    ) -> Result<CheckResult, ModerationError> {
        let Some(service) = &self.service else {
            return Ok(CheckResult::clean());
        };
        self.bounded(service.pass_text_check(scenario, text)).await
    }

    /// Check one streamed delta. `stream_id` groups the deltas of one
    /// response on the service side.
    ///
    /// # Errors
    ///
    /// Transport, status, decode and timeout failures of the service call.
    pub async fn check_delta(
        &self,
        content: &str,
        stream_id: &str,
    ) -> Result<CheckResult, ModerationError> {
        let Some(service) = &self.service else {
            return Ok(CheckResult::clean());
        };
        self.bounded(service.pass_llm_resp_check(content, stream_id))
            .await
    }

    /// Check the first choice of a buffered response.
    ///
    /// # Errors
    ///
    /// Transport, status, decode and timeout failures of the service call.
    pub async fn check_chat_non_stream_response(
        &self,
        response: &OpenAiChatResponse,
    ) -> Result<CheckResult, ModerationError> {
        let content = response.first_content();
        if content.trim().is_empty() {
            return Ok(CheckResult::clean());
        }
        self.check_text(Scenario::ChatDetection, content).await
    }

    /// Check a streamed chunk, skipping chunks [`moderation_text`] rejects.
    ///
    /// # Errors
    ///
    /// Transport, status, decode and timeout failures of the service call.
    pub async fn check_chat_stream_response(
        &self,
        chunk: &OpenAiStreamChunk,
        stream_id: &str,
    ) -> Result<CheckResult, ModerationError> {
        match moderation_text(chunk) {
            Some(text) => self.check_delta(text, stream_id).await,
            None => Ok(CheckResult::clean()),
        }
    }

    /// Check prompt messages one by one, stopping at the first sensitive
    /// one. Blank messages are skipped.
    ///
    /// Long message text is cut at sentence punctuation and packed into windows of at
    /// most [`SLIDING_WINDOW_SIZE`] bytes; windows that passed before are
    /// answered from the cache. `session_key` identifies the caller to the
    /// service.
    ///
    /// # Errors
    ///
    /// The first failed service call.
    pub async fn check_chat_prompts(
        &self,
        messages: &[OpenAiMessage],
        session_key: &str,
    ) -> Result<CheckResult, ModerationError> {
        if !self.is_enabled() {
            return Ok(CheckResult::clean());
        }
        for message in messages {
            let Some(text) = message.content.as_ref().map(|content| content.joined_text(" ")) else {
                continue;
            };
            if text.trim().is_empty() {
                continue;
            }
            let result = self.check_prompt(&text, session_key).await?;
            if result.is_sensitive {
                debug!(role = %message.role, reason = %result.reason, "sensitive chat message");
                return Ok(result);
            }
        }
        Ok(CheckResult::clean())
    }

    /// Check one message's text, packing long text into windows.
    async fn check_prompt(
        &self,
        text: &str,
        session_key: &str,
    ) -> Result<CheckResult, ModerationError> {
        let content = fold_escaped_newlines(text);
        if content.trim().is_empty() {
            return Ok(CheckResult::clean());
        }
        if content.len() < MAX_CONTENT_LENGTH {
            return self.check_prompt_window(&content, session_key).await;
        }

        let mut window = String::new();
        let mut members: Vec<&str> = Vec::new();
        for segment in sentence_segments(&content) {
            if let Some(cached) = self.cached_prompt_result(segment) {
                if cached.is_sensitive {
                    return Ok(cached);
                }
                continue;
            }
            if !window.is_empty() && window.len() + segment.len() + 1 > SLIDING_WINDOW_SIZE {
                let result = self.check_prompt_batch(&window, &members, session_key).await?;
                if result.is_sensitive {
                    return Ok(result);
                }
                window.clear();
                members.clear();
            }
            if !window.is_empty() {
                window.push('.');
            }
            window.push_str(segment);
            members.push(segment);
        }

        if window.is_empty() {
            return Ok(CheckResult::clean());
        }
        self.check_prompt_batch(&window, &members, session_key).await
    }

    fn cached_prompt_result(&self, text: &str) -> Option<CheckResult> {
        self.prompt_cache
            .as_ref()
            .and_then(|cache| cache.get(&prompt_cache_key(text)))
    }

    async fn check_prompt_window(
        &self,
        text: &str,
        session_key: &str,
    ) -> Result<CheckResult, ModerationError> {
        if let Some(cached) = self.cached_prompt_result(text) {
            debug!(sensitive = cached.is_sensitive, "prompt moderation cache hit");
            return Ok(cached);
        }
        let Some(service) = &self.service else {
            return Ok(CheckResult::clean());
        };
        let result = self
            .bounded(service.pass_llm_prompt_check(text, session_key))
            .await?;
        if let Some(cache) = &self.prompt_cache {
            cache.insert(prompt_cache_key(text), result.clone());
        }
        Ok(result)
    }

    /// Check a packed window; when it passes, remember each member segment
    /// as clean so later prompts repeating it skip the call.
    async fn check_prompt_batch(
        &self,
        window: &str,
        members: &[&str],
        session_key: &str,
    ) -> Result<CheckResult, ModerationError> {
        let result = self.check_prompt_window(window, session_key).await?;
        if !result.is_sensitive {
            if let Some(cache) = &self.prompt_cache {
                for member in members {
                    cache.insert(prompt_cache_key(member), CheckResult::clean());
                }
            }
        }
        Ok(result)
    }
}

/// Prompt text as the moderation service sees it: escaped newlines folded.
fn fold_escaped_newlines(text: &str) -> String {
    text.replace("\\\\n", "\n").replace("\\n", "")
}

/// Split on sentence punctuation and trim, then cut any piece still longer
/// than the window at char boundaries. Blank pieces are dropped.
fn sentence_segments(content: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    for sentence in content.split(['.', '?', '!']) {
        let mut rest = sentence.trim();
        while rest.len() > SLIDING_WINDOW_SIZE {
            let mut cut = SLIDING_WINDOW_SIZE;
            while !rest.is_char_boundary(cut) {
                cut -= 1;
            }
            let (head, tail) = rest.split_at(cut);
            segments.push(head);
            rest = tail;
        }
        if !rest.is_empty() {
            segments.push(rest);
        }
    }
    segments
}

fn prompt_cache_key(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut key = String::with_capacity(PROMPT_CACHE_PREFIX.len() + 64);
    key.push_str(PROMPT_CACHE_PREFIX);
    key.push_str(&hex::encode(digest));
    key
}
