use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and config summary.
pub fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "status": "aigateway is running",
        "config": {
            "models_count": state.models.len(),
            "client_keys_count": config.client_authentication.allowed_keys.len(),
            "moderation_enabled": state.moderation.is_enabled(),
            "features": {
                "log_level": config.features.log_level,
            }
        }
    }))
}
