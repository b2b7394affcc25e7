use std::sync::Arc;

use crate::auth::{authenticate, build_allowed_key_set, AllowedClientKeys, ClientIdentity};
use crate::config::AppConfig;
use crate::error::GatewayError;
use crate::moderation::Moderation;
use crate::routing::ModelRegistry;
use crate::token::TokenizerFactory;
use crate::transport::build_http_client;

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub http: reqwest::Client,
    pub models: ModelRegistry,
    pub moderation: Arc<Moderation>,
    pub tokenizers: TokenizerFactory,
    allowed_client_keys: AllowedClientKeys,
}

impl AppState {
    /// Assemble state from pre-built parts.
    #[must_use]
    pub fn new(
        config: AppConfig,
        http: reqwest::Client,
        models: ModelRegistry,
        moderation: Arc<Moderation>,
    ) -> Self {
        let allowed_client_keys = build_allowed_key_set(&config);
        let tokenizers = TokenizerFactory::new(http.clone());
        Self {
            config,
            http,
            models,
            moderation,
            tokenizers,
            allowed_client_keys,
        }
    }

    /// Build the full state for a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Config` when the HTTP client or a model entry
    /// cannot be built.
    pub fn from_config(config: AppConfig) -> Result<Self, GatewayError> {
        let http = build_http_client(&config.server)?;
        let models = ModelRegistry::new(&config)?;
        let moderation = Arc::new(Moderation::from_config(&config.moderation, http.clone()));
        tracing::info!(
            models = models.len(),
            moderation = moderation.is_enabled(),
            "gateway state initialized"
        );
        Ok(Self::new(config, http, models, moderation))
    }

    /// Authenticate an incoming request.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Auth` when the bearer key is missing or unknown.
    pub fn authenticate(&self, headers: &http::HeaderMap) -> Result<ClientIdentity, GatewayError> {
        authenticate(headers, &self.allowed_client_keys)
    }

    #[must_use]
    pub fn max_non_stream_buffer_bytes(&self) -> usize {
        self.config.server.max_non_stream_buffer_bytes
    }
}
