//! HTTP request handlers.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    response::{IntoResponse, Response},
    Json,
};

use super::server::AppState;
use super::types::{ModelsQuery, PromptRequest};
use crate::error::Error;

/// Unreadable or non-JSON bodies get the same error shape as other 400s.
fn bad_body(rejection: JsonRejection) -> Error {
    tracing::warn!(error = %rejection.body_text(), "Rejected request body");
    Error::BadRequest(rejection.body_text())
}

/// Handle POST /prompt/text
pub async fn prompt_text(
    State(state): State<AppState>,
    payload: Result<Json<PromptRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, Error> {
    let Json(request) = payload.map_err(bad_body)?;
    let prompt = request.prompt()?;
    let provider = state.providers.get(request.provider.as_deref())?;
    let model = request.model_or(provider.default_model());

    tracing::info!(provider = %provider.name(), model = %model, "Received prompt request");

    provider.prompt_once(prompt, model).await.map(Json)
}

/// Handle POST /promptStream/text
pub async fn prompt_stream_text(
    State(state): State<AppState>,
    payload: Result<Json<PromptRequest>, JsonRejection>,
) -> Result<Response, Error> {
    let Json(request) = payload.map_err(bad_body)?;
    let prompt = request.prompt()?;
    let provider = state.providers.get(request.provider.as_deref())?;
    let model = request.model_or(provider.default_model());

    tracing::info!(provider = %provider.name(), model = %model, "Received streaming prompt request");

    provider.prompt_streaming(prompt, model).await
}

/// Handle GET /models
pub async fn list_models(
    State(state): State<AppState>,
    Query(query): Query<ModelsQuery>,
) -> Result<Json<serde_json::Value>, Error> {
    let provider = state.providers.get(query.provider.as_deref())?;
    provider.list_models().await.map(Json)
}

/// Handle GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "easygpt"
    }))
}

/// Handle GET /providers
pub async fn list_providers(State(state): State<AppState>) -> impl IntoResponse {
    let providers: Vec<serde_json::Value> = state
        .providers
        .providers()
        .iter()
        .map(|p| {
            serde_json::json!({
                "name": p.name(),
                "kind": p.kind(),
                "default_model": p.default_model(),
            })
        })
        .collect();

    Json(serde_json::json!({
        "default": state.providers.default_name(),
        "providers": providers
    }))
}
