pub mod dispatch;

use std::sync::Arc;

use http::{HeaderMap, HeaderName, HeaderValue};
use rustc_hash::FxHashMap;
use url::Url;

use crate::config::{AppConfig, ModelConfig};
use crate::error::GatewayError;
use crate::token::ServingFramework;

/// A configured model with everything needed to forward a request to it.
#[derive(Debug, Clone)]
pub struct ModelEntry {
    pub id: String,
    pub upstream_name: String,
    pub endpoint: Url,
    pub framework: Option<ServingFramework>,
    pub auth_headers: HeaderMap,
    pub stream_usage: bool,
    pub owned_by: String,
}

impl ModelEntry {
    fn from_config(model: &ModelConfig) -> Result<Self, GatewayError> {
        let endpoint = Url::parse(&model.endpoint).map_err(|err| {
            GatewayError::Config(format!("model '{}' endpoint: {err}", model.id))
        })?;
        let mut auth_headers = HeaderMap::with_capacity(model.auth_headers.len());
        for (name, value) in &model.auth_headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|err| {
                GatewayError::Config(format!("model '{}' header name: {err}", model.id))
            })?;
            let value = HeaderValue::from_str(value).map_err(|err| {
                GatewayError::Config(format!("model '{}' header value: {err}", model.id))
            })?;
            auth_headers.insert(name, value);
        }
        Ok(Self {
            id: model.id.clone(),
            upstream_name: model.upstream_model_name().to_string(),
            endpoint,
            framework: model.framework,
            auth_headers,
            stream_usage: model.stream_usage,
            owned_by: model.owned_by.clone(),
        })
    }

    /// URL to forward a request received on `request_path` to.
    ///
    /// An endpoint with a path other than `/` is used as-is; a bare base
    /// URL gets the request path appended.
    #[must_use]
    pub fn upstream_url(&self, request_path: &str) -> Url {
        let endpoint_path = self.endpoint.path();
        if !endpoint_path.is_empty() && endpoint_path != "/" {
            return self.endpoint.clone();
        }
        let mut url = self.endpoint.clone();
        url.set_path(request_path);
        url
    }
}

/// Public model ids mapped to their backends, in config order.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    index: FxHashMap<String, usize>,
    models: Vec<Arc<ModelEntry>>,
}

impl ModelRegistry {
    /// Build a registry from the application configuration.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Config` for an unparsable endpoint or header.
    pub fn new(config: &AppConfig) -> Result<Self, GatewayError> {
        let mut registry = Self::default();
        for model in &config.models {
            let entry = ModelEntry::from_config(model)?;
            registry
                .index
                .insert(entry.id.clone(), registry.models.len());
            registry.models.push(Arc::new(entry));
        }
        Ok(registry)
    }

    #[must_use]
    pub fn resolve(&self, model_id: &str) -> Option<Arc<ModelEntry>> {
        self.index
            .get(model_id)
            .map(|&idx| Arc::clone(&self.models[idx]))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelEntry> {
        self.models.iter().map(AsRef::as_ref)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    fn registry() -> ModelRegistry {
        let config = parse_config(
            r"
models:
  - id: qwen:fast
    endpoint: http://10.0.0.1:8000
    framework: vllm
  - id: llama
    upstream_name: meta/llama
    endpoint: http://10.0.0.2:8080/generate/chat?v=2
    auth_headers:
      authorization: Bearer up
client_authentication:
  allowed_keys: [sk-a]
",
        )
        .unwrap();
        ModelRegistry::new(&config).unwrap()
    }

    #[test]
    fn test_resolve_known_and_unknown() {
        let registry = registry();
        assert_eq!(registry.len(), 2);
        let qwen = registry.resolve("qwen:fast").unwrap();
        assert_eq!(qwen.upstream_name, "qwen");
        assert_eq!(qwen.framework, Some(ServingFramework::Vllm));
        assert!(registry.resolve("qwen").is_none());

        let ids: Vec<&str> = registry.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["qwen:fast", "llama"]);
    }

    #[test]
    fn test_upstream_url() {
        let registry = registry();
        let qwen = registry.resolve("qwen:fast").unwrap();
        assert_eq!(
            qwen.upstream_url("/v1/chat/completions").as_str(),
            "http://10.0.0.1:8000/v1/chat/completions"
        );

        let llama = registry.resolve("llama").unwrap();
        assert_eq!(
            llama.upstream_url("/v1/chat/completions").as_str(),
            "http://10.0.0.2:8080/generate/chat?v=2"
        );
        assert_eq!(llama.auth_headers["authorization"], "Bearer up");
    }
}
