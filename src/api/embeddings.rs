use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tracing::debug;

use super::proxy::{
    passthrough_response, pump_body, send_upstream, writer_response, BODY_CHANNEL_CAPACITY,
};
use crate::compress::ContentEncoding;
use crate::error::GatewayError;
use crate::observability::{record_usage, UsageContext};
use crate::protocol::openai_embedding::OpenAiEmbeddingRequest;
use crate::state::AppState;
use crate::token::EmbeddingTokenCounter;
use crate::transport::UpstreamEncoding;
use crate::writer::{channel_body, EmbeddingResponseWriter};

const USAGE_ENDPOINT: &str = "embeddings";

/// `POST /v1/embeddings`.
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

async fn handle(
    state: &Arc<AppState>,
    request_path: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, GatewayError> {
    let identity = state.authenticate(headers)?;
    let mut request: OpenAiEmbeddingRequest = serde_json::from_slice(body)
        .map_err(|err| GatewayError::InvalidRequest(format!("Invalid JSON body: {err}")))?;
    if request.model.trim().is_empty() {
        return Err(GatewayError::InvalidRequest("`model` is required".to_string()));
    }
    let model = state
        .models
        .resolve(&request.model)
        .ok_or_else(|| GatewayError::ModelNotFound(request.model.clone()))?;
    request.model.clone_from(&model.upstream_name);

    let tokenizer = state
        .tokenizers
        .create(model.framework, &model.endpoint, &model.upstream_name);
    let mut counter = EmbeddingTokenCounter::new(tokenizer);
    counter.input(request.input.as_text());

    let upstream_body = serde_json::to_vec(&request)
        .map_err(|err| GatewayError::Internal(format!("Failed to encode request: {err}")))?;
    let upstream = send_upstream(
        state,
        &model,
        request_path,
        headers,
        UpstreamEncoding::FromClient,
        upstream_body,
    ).await?;
    if !upstream.status().is_success() {
        debug!(model = %model.id, status = %upstream.status(), "relaying upstream error");
        return Ok(passthrough_response(upstream));
    }

    let context = UsageContext::new(&identity.id, &model.id, USAGE_ENDPOINT, false);
    let (sink, client_body) = channel_body(BODY_CHANNEL_CAPACITY);
    let response = writer_response(&upstream, client_body);
    let mut writer = EmbeddingResponseWriter::new(
        sink,
        counter,
        ContentEncoding::from_headers(upstream.headers()),
        state.max_non_stream_buffer_bytes(),
    );
    tokio::spawn(async move {
        let outcome = pump_body(&mut writer, upstream).await;
        debug!(outcome = ?outcome, "embedding response finished");
        let (_, counter) = writer.into_parts();
        record_usage(&counter, &context).await;
    });

    Ok(response)
}
