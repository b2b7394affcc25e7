use std::time::Duration;

use http::header::{
    HeaderName, ACCEPT_ENCODING, AUTHORIZATION, CONNECTION, CONTENT_LENGTH, HOST,
    TRANSFER_ENCODING, UPGRADE,
};
use http::HeaderMap;

use crate::config::ServerConfig;
use crate::error::GatewayError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Headers that belong to one connection and are never forwarded.
const HOP_BY_HOP: [&str; 6] = [
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    name == CONNECTION
        || name == TRANSFER_ENCODING
        || name == UPGRADE
        || HOP_BY_HOP.contains(&name.as_str())
}

/// Build the shared upstream client.
///
/// One client serves model backends, the moderation service and tokenizer
/// endpoints, so they share a connection pool.
///
/// # Errors
///
/// Returns `GatewayError::Config` when the TLS backend cannot be set up.
pub fn build_http_client(config: &ServerConfig) -> Result<reqwest::Client, GatewayError> {
    let pool_idle_timeout = if config.http_pool_idle_timeout_secs == 0 {
        None
    } else {
        Some(Duration::from_secs(config.http_pool_idle_timeout_secs))
    };

    reqwest::Client::builder()
        .pool_max_idle_per_host(config.http_pool_max_idle_per_host.max(1))
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_secs(config.timeout))
        .no_proxy()
        .build()
        .map_err(|err| GatewayError::Config(format!("Failed to build HTTP client: {err}")))
}

/// Response compression the backend is allowed to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamEncoding {
    /// Pass the client's `Accept-Encoding` along, `identity` without one.
    FromClient,
    /// Always ask for an uncompressed body.
    Identity,
}

/// Headers to send upstream for a client request.
///
/// The client's credentials, `Host` and `Content-Length` are dropped, the
/// model's configured headers are added on top. `Accept-Encoding` follows
/// `encoding`.
#[must_use]
pub fn forward_request_headers(
    client_headers: &HeaderMap,
    model_headers: &HeaderMap,
    encoding: UpstreamEncoding,
) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(client_headers.len() + model_headers.len());
    for (name, value) in client_headers {
        if name == AUTHORIZATION || name == HOST || name == CONTENT_LENGTH || is_hop_by_hop(name) {
            continue;
        }
        if name == ACCEPT_ENCODING && encoding == UpstreamEncoding::Identity {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    if !headers.contains_key(ACCEPT_ENCODING) {
        headers.insert(ACCEPT_ENCODING, http::HeaderValue::from_static("identity"));
    }
    for (name, value) in model_headers {
        headers.insert(name.clone(), value.clone());
    }
    headers
}

/// Upstream response headers that may be passed to the client.
///
/// `Content-Length` is dropped because writers may change the body length.
#[must_use]
pub fn response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if name == CONTENT_LENGTH || is_hop_by_hop(name) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{CONTENT_ENCODING, CONTENT_TYPE};
    use http::HeaderValue;

    #[test]
    fn test_forward_request_headers_replaces_credentials() {
        let mut client = HeaderMap::new();
        client.insert(AUTHORIZATION, HeaderValue::from_static("Bearer sk-client"));
        client.insert(HOST, HeaderValue::from_static("gateway"));
        client.insert(CONTENT_LENGTH, HeaderValue::from_static("42"));
        client.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        client.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        client.insert("x-request-id", HeaderValue::from_static("abc"));

        let mut model = HeaderMap::new();
        model.insert(AUTHORIZATION, HeaderValue::from_static("Bearer upstream"));

        let headers = forward_request_headers(&client, &model, UpstreamEncoding::FromClient);
        assert_eq!(headers[AUTHORIZATION], "Bearer upstream");
        assert_eq!(headers[CONTENT_TYPE], "application/json");
        assert_eq!(headers["x-request-id"], "abc");
        assert_eq!(headers[ACCEPT_ENCODING], "identity");
        assert!(!headers.contains_key(HOST));
        assert!(!headers.contains_key(CONTENT_LENGTH));
        assert!(!headers.contains_key(CONNECTION));
    }

    #[test]
    fn test_forward_request_headers_keeps_client_accept_encoding() {
        let mut client = HeaderMap::new();
        client.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, br"));
        let headers = forward_request_headers(&client, &HeaderMap::new(), UpstreamEncoding::FromClient);
        assert_eq!(headers[ACCEPT_ENCODING], "gzip, br");
    }

    #[test]
    fn test_forward_request_headers_can_force_identity() {
        let mut client = HeaderMap::new();
        client.append(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        client.append(ACCEPT_ENCODING, HeaderValue::from_static("br"));
        let headers = forward_request_headers(&client, &HeaderMap::new(), UpstreamEncoding::Identity);
        let values: Vec<_> = headers.get_all(ACCEPT_ENCODING).iter().collect();
        assert_eq!(values, ["identity"]);
    }

    #[test]
    fn test_response_headers_drop_length() {
        let mut upstream = HeaderMap::new();
        upstream.insert(CONTENT_LENGTH, HeaderValue::from_static("10"));
        upstream.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        upstream.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        upstream.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let headers = response_headers(&upstream);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[CONTENT_ENCODING], "gzip");
    }

    #[test]
    fn test_build_http_client() {
        assert!(build_http_client(&ServerConfig::default()).is_ok());
    }
}
