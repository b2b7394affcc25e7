//! Forwarding to model backends and pumping their bodies through writers.

use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use futures_util::StreamExt;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue};
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::routing::ModelEntry;
use crate::state::AppState;
use crate::transport::{forward_request_headers, response_headers, UpstreamEncoding};
use crate::writer::{ResponseWriter, WriteError};

/// Frames buffered between a writer and the client connection.
pub(crate) const BODY_CHANNEL_CAPACITY: usize = 32;

/// How a pumped upstream body ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PumpOutcome {
    Completed,
    /// A writer replaced the content and terminated the response.
    Blocked,
    ClientGone,
    UpstreamFailed,
}

/// POST `body` to the model's backend.
pub(crate) async fn send_upstream(
    state: &AppState,
    model: &ModelEntry,
    request_path: &str,
    client_headers: &HeaderMap,
    encoding: UpstreamEncoding,
    body: Vec<u8>,
) -> Result<reqwest::Response, GatewayError> {
    let url = model.upstream_url(request_path);
    let mut headers = forward_request_headers(client_headers, &model.auth_headers, encoding);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    debug!(model = %model.id, url = %url, "forwarding request upstream");

    let response = state
        .http
        .post(url)
        .headers(headers)
        .body(body)
        .send()
        .await?;
    Ok(response)
}

/// Relay an upstream response to the client without inspection.
pub(crate) fn passthrough_response(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let headers = response_headers(upstream.headers());
    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Response head for a body produced by a writer.
pub(crate) fn writer_response(upstream: &reqwest::Response, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = upstream.status();
    *response.headers_mut() = response_headers(upstream.headers());
    response
}

/// Copy the upstream body into `writer` until it ends, the writer blocks
/// the response or the client disconnects.
pub(crate) async fn pump_body<W: ResponseWriter>(
    writer: &mut W,
    upstream: reqwest::Response,
) -> PumpOutcome {
    let mut body = upstream.bytes_stream();
    let mut outcome = PumpOutcome::Completed;

    while let Some(item) = body.next().await {
        let chunk: Bytes = match item {
            Ok(chunk) => chunk,
            Err(err) => {
                warn!(error = %err, "upstream body ended with an error");
                outcome = PumpOutcome::UpstreamFailed;
                break;
            }
        };
        match writer.write(&chunk).await {
            Ok(_) => {}
            Err(WriteError::SensitiveContent) => return PumpOutcome::Blocked,
            Err(WriteError::Downstream(err)) => {
                debug!(error = %err, "client disconnected");
                return PumpOutcome::ClientGone;
            }
            Err(err) => {
                warn!(error = %err, "response writer failed");
                outcome = PumpOutcome::UpstreamFailed;
                break;
            }
        }
    }

    if let Err(err) = writer.finish().await {
        debug!(error = %err, "failed to flush buffered response bytes");
        return PumpOutcome::ClientGone;
    }
    outcome
}
