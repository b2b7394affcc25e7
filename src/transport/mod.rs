mod http_transport;

pub use http_transport::{
    build_http_client, forward_request_headers, response_headers, UpstreamEncoding,
};
