use std::collections::HashSet;

use super::{AppConfig, ConfigError, ModelConfig};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_allowed_keys(config)?;
    validate_models(config)?;
    validate_moderation(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "server.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    if server.timeout == 0 {
        return Err(validation_err("server.timeout must be greater than 0"));
    }
    if let Some(worker_threads) = server.runtime_worker_threads {
        if worker_threads == 0 {
            return Err(validation_err(
                "server.runtime_worker_threads must be greater than 0 when set",
            ));
        }
    }
    if server.max_non_stream_buffer_bytes == 0 {
        return Err(validation_err(
            "server.max_non_stream_buffer_bytes must be greater than 0",
        ));
    }
    if !server.base_path.is_empty() && !server.base_path.starts_with('/') {
        return Err(validation_err("server.base_path must start with '/'"));
    }
    Ok(())
}

fn validate_allowed_keys(config: &AppConfig) -> Result<(), ConfigError> {
    if config.client_authentication.allowed_keys.is_empty() {
        return Err(validation_err("allowed_keys cannot be empty"));
    }
    for key in &config.client_authentication.allowed_keys {
        if key.trim().is_empty() {
            return Err(validation_err("allowed_keys contains an empty key"));
        }
    }
    Ok(())
}

fn validate_models(config: &AppConfig) -> Result<(), ConfigError> {
    if config.models.is_empty() {
        return Err(validation_err("models cannot be empty"));
    }

    let mut seen = HashSet::new();
    for model in &config.models {
        if model.id.trim().is_empty() {
            return Err(validation_err("model id cannot be empty"));
        }
        if !seen.insert(model.id.as_str()) {
            return Err(validation_err(format!(
                "duplicate model id '{}'",
                model.id
            )));
        }
        validate_model_endpoint(model)?;
        for (name, value) in &model.auth_headers {
            if http::HeaderName::from_bytes(name.as_bytes()).is_err()
                || http::HeaderValue::from_str(value).is_err()
            {
                return Err(validation_err(format!(
                    "Model '{}': invalid auth header '{name}'",
                    model.id
                )));
            }
        }
    }
    Ok(())
}

fn validate_model_endpoint(model: &ModelConfig) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(&model.endpoint).map_err(|err| {
        validation_err(format!(
            "Model '{}': endpoint is not a valid URL: {err}",
            model.id
        ))
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(format!(
            "Model '{}': endpoint must use http:// or https://",
            model.id
        )));
    }
    Ok(())
}

fn validate_moderation(config: &AppConfig) -> Result<(), ConfigError> {
    let moderation = &config.moderation;
    if !moderation.enabled {
        return Ok(());
    }
    let parsed = url::Url::parse(&moderation.endpoint).map_err(|err| {
        validation_err(format!("moderation.endpoint is not a valid URL: {err}"))
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(
            "moderation.endpoint must use http:// or https://",
        ));
    }
    if moderation.timeout_ms == 0 {
        return Err(validation_err("moderation.timeout_ms must be greater than 0"));
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}
