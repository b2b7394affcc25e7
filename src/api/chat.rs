use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use super::proxy::{
    passthrough_response, pump_body, send_upstream, writer_response, BODY_CHANNEL_CAPACITY,
};
use super::unix_now_secs;
use crate::compress::ContentEncoding;
use crate::error::GatewayError;
use crate::moderation::CheckResult;
use crate::observability::{record_usage, UsageContext};
use crate::protocol::openai_chat::{OpenAiChatRequest, OpenAiChatResponse, OpenAiStreamChunk};
use crate::state::AppState;
use crate::stream::{done_frame, openai_sse_frame};
use crate::token::ChatTokenCounter;
use crate::transport::UpstreamEncoding;
use crate::writer::{channel_body, NonStreamResponseWriter, StreamResponseWriter};

const USAGE_ENDPOINT: &str = "chat.completions";

/// `POST /v1/chat/completions`.
pub async fn handler(
    State(state): State<Arc<AppState>>,
    request_path: &str,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match handle(&state, request_path, &headers, &body).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

fn parse_request(body: &[u8]) -> Result<OpenAiChatRequest, GatewayError> {
    let request: OpenAiChatRequest = serde_json::from_slice(body)
        .map_err(|err| GatewayError::InvalidRequest(format!("Invalid JSON body: {err}")))?;
    if request.model.trim().is_empty() {
        return Err(GatewayError::InvalidRequest("`model` is required".to_string()));
    }
    if request.messages.is_empty() {
        return Err(GatewayError::InvalidRequest(
            "`messages` must contain at least one message".to_string(),
        ));
    }
    Ok(request)
}

async fn handle(
    state: &Arc<AppState>,
    request_path: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, GatewayError> {
    let identity = state.authenticate(headers)?;
    let mut request = parse_request(body)?;
    let model = state
        .models
        .resolve(&request.model)
        .ok_or_else(|| GatewayError::ModelNotFound(request.model.clone()))?;
    let stream = request.is_stream();

    let verdict = match state
        .moderation
        .check_chat_prompts(&request.messages, &identity.id)
        .await
    {
        Ok(verdict) => verdict,
        Err(err) => {
            warn!(client_id = %identity.id, error = %err, "prompt moderation unavailable, forwarding request");
            CheckResult::clean()
        }
    };
    if verdict.is_sensitive {
        debug!(client_id = %identity.id, reason = %verdict.reason, "blocking sensitive prompt");
        return blocked_prompt_response(&model.id, stream);
    }

    request.model.clone_from(&model.upstream_name);
    if stream && model.stream_usage {
        request
            .stream_options
            .get_or_insert_with(Default::default)
            .include_usage = Some(true);
    }

    let tokenizer = state
        .tokenizers
        .create(model.framework, &model.endpoint, &model.upstream_name);
    let mut counter = ChatTokenCounter::new(tokenizer);
    counter.append_prompts(request.messages.iter().cloned());

    let upstream_body = serde_json::to_vec(&request)
        .map_err(|err| GatewayError::Internal(format!("Failed to encode request: {err}")))?;
    // Events are moderated as they pass, so streams are requested plain.
    let encoding = if stream {
        UpstreamEncoding::Identity
    } else {
        UpstreamEncoding::FromClient
    };
    let upstream =
        send_upstream(state, &model, request_path, headers, encoding, upstream_body).await?;
    if !upstream.status().is_success() {
        debug!(model = %model.id, status = %upstream.status(), "relaying upstream error");
        return Ok(passthrough_response(upstream));
    }

    let context = UsageContext::new(&identity.id, &model.id, USAGE_ENDPOINT, stream);
    let (sink, client_body) = channel_body(BODY_CHANNEL_CAPACITY);
    let mut response = writer_response(&upstream, client_body);
    let body_encoding = ContentEncoding::from_headers(upstream.headers());

    if stream {
        // The writer forwards the decoded stream.
        if body_encoding != ContentEncoding::Identity {
            debug!(model = %model.id, encoding = body_encoding.as_str(), "decoding compressed stream");
            response.headers_mut().remove(http::header::CONTENT_ENCODING);
        }
        let mut writer = StreamResponseWriter::new(sink, Arc::clone(&state.moderation), counter)
            .with_encoding(body_encoding);
        tokio::spawn(async move {
            let outcome = pump_body(&mut writer, upstream).await;
            debug!(outcome = ?outcome, chunks = writer.counter().chunk_count(), "stream finished");
            let (_, counter) = writer.into_parts();
            record_usage(&counter, &context).await;
        });
    } else {
        let mut writer = NonStreamResponseWriter::new(
            sink,
            Arc::clone(&state.moderation),
            counter,
            body_encoding,
            state.max_non_stream_buffer_bytes(),
        );
        tokio::spawn(async move {
            let outcome = pump_body(&mut writer, upstream).await;
            debug!(outcome = ?outcome, "completion finished");
            let (_, counter) = writer.into_parts();
            record_usage(&counter, &context).await;
        });
    }

    Ok(response)
}

fn blocked_prompt_response(model: &str, stream: bool) -> Result<Response, GatewayError> {
    let id = format!("chatcmpl-{}", uuid::Uuid::new_v4().simple());
    if !stream {
        let mut completion = OpenAiChatResponse::blocked_prompt(model);
        completion.id = id;
        completion.created = Some(unix_now_secs());
        return Ok((StatusCode::OK, Json(completion)).into_response());
    }

    let mut chunk = OpenAiStreamChunk::blocked_prompt(model);
    chunk.id = id;
    chunk.created = Some(unix_now_secs());
    let payload = serde_json::to_vec(&chunk)
        .map_err(|err| GatewayError::Internal(format!("Failed to encode chunk: {err}")))?;

    let mut body = BytesMut::new();
    body.extend_from_slice(&openai_sse_frame(&payload));
    body.extend_from_slice(&done_frame());

    let mut response = Response::new(Body::from(body.freeze()));
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache"),
    );
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_requires_model_and_messages() {
        assert!(matches!(
            parse_request(b"{not json"),
            Err(GatewayError::InvalidRequest(_))
        ));
        assert!(matches!(
            parse_request(br#"{"messages":[{"role":"user","content":"hi"}]}"#),
            Err(GatewayError::InvalidRequest(message)) if message.contains("model")
        ));
        assert!(matches!(
            parse_request(br#"{"model":"m","messages":[]}"#),
            Err(GatewayError::InvalidRequest(message)) if message.contains("messages")
        ));
        let request =
            parse_request(br#"{"model":"m","messages":[{"role":"user","content":"hi"}],"temperature":0.2}"#)
                .unwrap();
        assert_eq!(request.extra["temperature"], 0.2);
    }

    #[tokio::test]
    async fn test_blocked_prompt_stream_body() {
        let response = blocked_prompt_response("qwen", true).unwrap();
        assert_eq!(response.headers()["content-type"], "text/event-stream");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = std::str::from_utf8(&body).unwrap();
        assert!(text.starts_with("data: {"));
        assert!(text.ends_with("\n\ndata: [DONE]\n\n"));

        let payload = text
            .strip_prefix("data: ")
            .and_then(|rest| rest.split("\n\n").next())
            .unwrap();
        let chunk: OpenAiStreamChunk = serde_json::from_str(payload).unwrap();
        assert_eq!(chunk.model, "qwen");
        assert!(chunk.id.starts_with("chatcmpl-"));
        assert_eq!(chunk.choices[0].finish_reason.as_deref(), Some("sensitive"));
    }

    #[tokio::test]
    async fn test_blocked_prompt_json_body() {
        let response = blocked_prompt_response("qwen", false).unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let completion: OpenAiChatResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(completion.object, "chat.completion");
        assert!(completion.first_content().starts_with("The prompt includes"));
    }
}
