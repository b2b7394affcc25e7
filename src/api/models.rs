use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

use crate::error::GatewayError;
use crate::routing::ModelEntry;
use crate::state::AppState;

/// Fixed creation timestamp reported for every configured model.
const MODEL_CREATED: i64 = 1_677_610_602;

#[derive(Debug, Serialize)]
struct ModelObject<'a> {
    id: &'a str,
    object: &'static str,
    created: i64,
    owned_by: &'a str,
    root: &'a str,
    parent: Option<&'a str>,
    permission: Vec<serde_json::Value>,
}

impl<'a> ModelObject<'a> {
    fn new(model: &'a ModelEntry) -> Self {
        Self {
            id: &model.id,
            object: "model",
            created: MODEL_CREATED,
            owned_by: &model.owned_by,
            root: &model.id,
            parent: None,
            permission: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ModelList<'a> {
    object: &'static str,
    data: Vec<ModelObject<'a>>,
}

/// `GET /v1/models`: every configured model in `OpenAI` format.
#[must_use]
pub fn list_handler(State(state): State<Arc<AppState>>, headers: &HeaderMap) -> Response {
    if let Err(err) = state.authenticate(headers) {
        return err.into_response();
    }
    let list = ModelList {
        object: "list",
        data: state.models.iter().map(ModelObject::new).collect(),
    };
    Json(list).into_response()
}

/// `GET /v1/models/{id}`.
#[must_use]
pub fn detail_handler(State(state): State<Arc<AppState>>, headers: &HeaderMap, id: &str) -> Response {
    if let Err(err) = state.authenticate(headers) {
        return err.into_response();
    }
    match state.models.resolve(id) {
        Some(model) => Json(ModelObject::new(&model)).into_response(),
        None => GatewayError::ModelNotFound(id.to_string()).into_response(),
    }
}
