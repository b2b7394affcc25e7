//! `OpenAI` Chat Completions wire types.
//!
//! Only the fields the gateway reads are typed. Everything else lands in the
//! flattened `extra` maps so a decoded body re-serializes without losing
//! provider-specific fields.

use serde::{Deserialize, Serialize};

pub type WireExtensions = serde_json::Map<String, serde_json::Value>;

/// Replacement text for a completion that failed moderation.
pub const SENSITIVE_RESPONSE_MESSAGE: &str = "The message includes inappropriate content and has been blocked. We appreciate your understanding and cooperation.";

/// Replacement text for a prompt that failed moderation.
pub const SENSITIVE_PROMPT_MESSAGE: &str = "The prompt includes inappropriate content and has been blocked. We appreciate your understanding and cooperation.";

pub const FINISH_REASON_SENSITIVE: &str = "sensitive";

/// `OpenAI` Chat Completion request wire type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenAiChatRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<OpenAiMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<OpenAiStreamOptions>,
    #[serde(flatten)]
    pub extra: WireExtensions,
}

impl OpenAiChatRequest {
    #[must_use]
    pub fn is_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }
}

/// Stream options for `include_usage`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenAiStreamOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_usage: Option<bool>,
}

/// A prompt message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenAiMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(flatten)]
    pub extra: WireExtensions,
}

impl OpenAiMessage {
    #[must_use]
    pub fn text(role: &str, text: &str) -> Self {
        Self {
            role: role.to_string(),
            content: Some(MessageContent::Text(text.to_string())),
            extra: WireExtensions::new(),
        }
    }

    /// Text of the message with multipart text segments concatenated.
    #[must_use]
    pub fn text_content(&self) -> String {
        self.content
            .as_ref()
            .map(|content| content.joined_text(""))
            .unwrap_or_default()
    }
}

/// Message content: a plain string or a list of typed parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Text segments joined with `separator`. Non-text parts are skipped.
    #[must_use]
    pub fn joined_text(&self, separator: &str) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => {
                let mut out = String::new();
                for text in parts.iter().filter_map(ContentPart::as_text) {
                    if !out.is_empty() {
                        out.push_str(separator);
                    }
                    out.push_str(text);
                }
                out
            }
        }
    }
}

/// One part of a multipart message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    ImageUrl {
        image_url: serde_json::Value,
    },
    InputAudio {
        input_audio: serde_json::Value,
    },
    File {
        file: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

impl ContentPart {
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Usage block shared by chunks and full completions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenAiUsage {
    #[serde(default)]
    pub prompt_tokens: i64,
    #[serde(default)]
    pub completion_tokens: i64,
    #[serde(default)]
    pub total_tokens: i64,
    #[serde(flatten)]
    pub extra: WireExtensions,
}

/// `OpenAI` Chat Completion response wire type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenAiChatResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_fingerprint: Option<String>,
    #[serde(default)]
    pub choices: Vec<OpenAiChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<OpenAiUsage>,
    #[serde(flatten)]
    pub extra: WireExtensions,
}

impl OpenAiChatResponse {
    /// Content of the first choice, empty when absent.
    #[must_use]
    pub fn first_content(&self) -> &str {
        self.choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .unwrap_or_default()
    }

    /// Replace the first choice's content with the moderation block message.
    pub fn block_first_choice(&mut self) {
        if let Some(choice) = self.choices.first_mut() {
            choice.message.content = Some(SENSITIVE_RESPONSE_MESSAGE.to_string());
        }
    }

    /// Complete response returned in place of a non-stream request whose
    /// prompt failed moderation.
    #[must_use]
    pub fn blocked_prompt(model: &str) -> Self {
        Self {
            id: String::new(),
            object: "chat.completion".to_string(),
            created: None,
            model: model.to_string(),
            system_fingerprint: None,
            choices: vec![OpenAiChoice {
                index: 0,
                message: OpenAiResponseMessage {
                    role: "assistant".to_string(),
                    content: Some(SENSITIVE_PROMPT_MESSAGE.to_string()),
                    reasoning_content: None,
                    extra: WireExtensions::new(),
                },
                finish_reason: Some(FINISH_REASON_SENSITIVE.to_string()),
                extra: WireExtensions::new(),
            }],
            usage: None,
            extra: WireExtensions::new(),
        }
    }
}

/// A single choice in a full response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenAiChoice {
    #[serde(default)]
    pub index: i64,
    #[serde(default)]
    pub message: OpenAiResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(flatten)]
    pub extra: WireExtensions,
}

/// Assistant message within a full response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenAiResponseMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(flatten)]
    pub extra: WireExtensions,
}

/// A streaming chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenAiStreamChunk {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_fingerprint: Option<String>,
    #[serde(default)]
    pub choices: Vec<OpenAiStreamChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<OpenAiUsage>,
    #[serde(flatten)]
    pub extra: WireExtensions,
}

impl OpenAiStreamChunk {
    /// Chunk sent in place of a flagged delta.
    ///
    /// Keeps the identity and usage fields of `self` and carries a single
    /// choice with the block message and a `sensitive` finish reason.
    #[must_use]
    pub fn blocked_replacement(&self) -> Self {
        Self {
            id: self.id.clone(),
            object: self.object.clone(),
            created: self.created,
            model: self.model.clone(),
            system_fingerprint: self.system_fingerprint.clone(),
            choices: vec![OpenAiStreamChoice::blocked(SENSITIVE_RESPONSE_MESSAGE)],
            usage: self.usage.clone(),
            extra: WireExtensions::new(),
        }
    }

    /// Chunk streamed in place of a completion whose prompt failed
    /// moderation.
    #[must_use]
    pub fn blocked_prompt(model: &str) -> Self {
        Self {
            object: "chat.completion.chunk".to_string(),
            model: model.to_string(),
            choices: vec![OpenAiStreamChoice::blocked(SENSITIVE_PROMPT_MESSAGE)],
            ..Self::default()
        }
    }
}

/// A choice within a stream chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenAiStreamChoice {
    #[serde(default)]
    pub index: i64,
    #[serde(default)]
    pub delta: OpenAiDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(flatten)]
    pub extra: WireExtensions,
}

impl OpenAiStreamChoice {
    fn blocked(message: &str) -> Self {
        Self {
            index: 0,
            delta: OpenAiDelta {
                content: Some(message.to_string()),
                ..OpenAiDelta::default()
            },
            finish_reason: Some(FINISH_REASON_SENSITIVE.to_string()),
            extra: WireExtensions::new(),
        }
    }
}

/// Delta content within a stream choice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenAiDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: WireExtensions,
}

impl OpenAiDelta {
    #[must_use]
    pub fn content(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub fn reasoning_content(&self) -> &str {
        self.reasoning_content.as_deref().unwrap_or_default()
    }

    /// Whether the delta carries a tool or function call. An empty
    /// `tool_calls` array does not count.
    #[must_use]
    pub fn has_tool_call(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|calls| !calls.is_empty())
            || self.function_call.as_ref().is_some_and(|call| !call.is_null())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_roundtrip_keeps_unknown_fields() {
        let raw = r#"{"id":"c1","object":"chat.completion.chunk","model":"m","service_tier":"flex","choices":[{"index":0,"delta":{"content":"hi","refusal":null},"logprobs":null,"finish_reason":null}]}"#;
        let chunk: OpenAiStreamChunk = serde_json::from_str(raw).unwrap();
        assert_eq!(chunk.choices[0].delta.content(), "hi");
        assert_eq!(chunk.extra["service_tier"], "flex");

        let value = serde_json::to_value(&chunk).unwrap();
        assert_eq!(value["service_tier"], "flex");
        assert!(value["choices"][0]["delta"]
            .as_object()
            .unwrap()
            .contains_key("refusal"));
        assert!(value["choices"][0]
            .as_object()
            .unwrap()
            .contains_key("logprobs"));
    }

    #[test]
    fn test_chunk_with_null_usage() {
        let raw = r#"{"id":"c1","choices":[],"usage":null}"#;
        let chunk: OpenAiStreamChunk = serde_json::from_str(raw).unwrap();
        assert!(chunk.usage.is_none());
        assert!(chunk.choices.is_empty());
    }

    #[test]
    fn test_non_object_payload_is_rejected() {
        assert!(serde_json::from_str::<OpenAiStreamChunk>("invalid json data").is_err());
        assert!(serde_json::from_str::<OpenAiStreamChunk>("[1,2]").is_err());
        assert!(serde_json::from_str::<OpenAiStreamChunk>(r#"{"choices":"x"}"#).is_err());
    }

    #[test]
    fn test_blocked_replacement_keeps_identity_fields() {
        let raw = r#"{"id":"c9","object":"chat.completion.chunk","model":"qwen","system_fingerprint":"fp","choices":[{"index":2,"delta":{"content":"bad"}}],"usage":{"prompt_tokens":1,"completion_tokens":2,"total_tokens":3}}"#;
        let chunk: OpenAiStreamChunk = serde_json::from_str(raw).unwrap();
        let blocked = chunk.blocked_replacement();

        assert_eq!(blocked.id, "c9");
        assert_eq!(blocked.model, "qwen");
        assert_eq!(blocked.object, "chat.completion.chunk");
        assert_eq!(blocked.system_fingerprint.as_deref(), Some("fp"));
        assert_eq!(blocked.usage.as_ref().map(|u| u.total_tokens), Some(3));
        assert_eq!(blocked.choices.len(), 1);
        assert_eq!(blocked.choices[0].delta.content(), SENSITIVE_RESPONSE_MESSAGE);
        assert_eq!(blocked.choices[0].finish_reason.as_deref(), Some("sensitive"));
    }

    #[test]
    fn test_block_first_choice_only_touches_content() {
        let raw = r#"{"id":"r1","object":"chat.completion","model":"m","choices":[{"index":0,"message":{"role":"assistant","content":"bad words"},"finish_reason":"stop"}],"usage":{"prompt_tokens":4,"completion_tokens":2,"total_tokens":6}}"#;
        let mut response: OpenAiChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.first_content(), "bad words");

        response.block_first_choice();
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(
            value["choices"][0]["message"]["content"],
            SENSITIVE_RESPONSE_MESSAGE
        );
        assert_eq!(value["choices"][0]["finish_reason"], "stop");
        assert_eq!(value["usage"]["total_tokens"], 6);
    }

    #[test]
    fn test_multipart_message_text() {
        let raw = r#"{"role":"user","content":[{"type":"text","text":"describe"},{"type":"image_url","image_url":{"url":"http://x/y.png"}},{"type":"text","text":"this"},{"type":"video","video":{}}]}"#;
        let message: OpenAiMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(message.text_content(), "describethis");
        assert_eq!(
            message.content.as_ref().unwrap().joined_text(" "),
            "describe this"
        );

        let plain = OpenAiMessage::text("system", "be brief");
        assert_eq!(plain.text_content(), "be brief");
    }
}
