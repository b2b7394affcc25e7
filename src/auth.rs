use crate::config::AppConfig;
use crate::error::GatewayError;
use http::header::AUTHORIZATION;
use rustc_hash::FxHashSet;
use sha2::{Digest, Sha256};

/// Hex chars of the key digest kept as the client id.
const CLIENT_ID_LEN: usize = 16;

/// Index of bearer keys accepted by the gateway.
pub struct AllowedClientKeys {
    keys: FxHashSet<String>,
}

/// Authenticated caller. The id is derived from the key and safe to log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub id: String,
}

impl ClientIdentity {
    #[must_use]
    pub fn from_key(key: &str) -> Self {
        let mut id = hex::encode(Sha256::digest(key.as_bytes()));
        id.truncate(CLIENT_ID_LEN);
        Self { id }
    }
}

/// Extract the key from `Authorization: Bearer <key>`.
///
/// # Errors
///
/// Returns `GatewayError::Auth` when the header is missing or not a bearer token.
pub fn extract_api_key(headers: &http::HeaderMap) -> Result<&str, GatewayError> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .ok_or_else(|| GatewayError::Auth("Missing API key".to_string()))
}

/// Authenticate an incoming request against the allowed keys.
///
/// # Errors
///
/// Returns `GatewayError::Auth` when the API key is missing or invalid.
pub fn authenticate(
    headers: &http::HeaderMap,
    allowed_keys: &AllowedClientKeys,
) -> Result<ClientIdentity, GatewayError> {
    let client_key = extract_api_key(headers)?;
    if allowed_keys.keys.contains(client_key) {
        Ok(ClientIdentity::from_key(client_key))
    } else {
        Err(GatewayError::Auth("Invalid API key".to_string()))
    }
}

/// Build a hash-set index for allowed client keys.
#[must_use]
pub fn build_allowed_key_set(config: &AppConfig) -> AllowedClientKeys {
    AllowedClientKeys {
        keys: config
            .client_authentication
            .allowed_keys
            .iter()
            .map(|key| key.trim().to_string())
            .collect(),
    }
}
