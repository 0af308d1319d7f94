use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::{error_response, run_blocking};
use crate::app::AppState;
use crate::customization::CustomRule;

pub(crate) async fn clear_cache(State(state): State<AppState>) -> impl IntoResponse {
    state.telemetry().record_admin_invocation("cache_clear");
    state.predictor().clear_cache();
    StatusCode::NO_CONTENT
}

pub(crate) async fn cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.predictor().cache_stats())
}

#[derive(Debug, Serialize)]
struct CleanupResponse {
    removed: usize,
}

pub(crate) async fn cleanup_test_tags(State(state): State<AppState>) -> impl IntoResponse {
    state.telemetry().record_admin_invocation("test_tags_cleanup");
    let predictor = state.predictor();
    match run_blocking(move || predictor.cleanup_test_tags()).await {
        Ok(removed) => (StatusCode::OK, Json(CleanupResponse { removed })).into_response(),
        Err(response) => response,
    }
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
pub(crate) struct KeywordRequest {
    category: String,
    keyword: String,
    #[serde(default = "default_weight")]
    weight: f64,
}

pub(crate) async fn add_keyword(
    State(state): State<AppState>,
    Json(payload): Json<KeywordRequest>,
) -> impl IntoResponse {
    state.telemetry().record_admin_invocation("keyword_add");
    let predictor = state.predictor();
    let result = run_blocking(move || {
        predictor.add_custom_keyword(&payload.category, &payload.keyword, payload.weight)
    })
    .await;

    match result {
        Ok(Ok(())) => StatusCode::CREATED.into_response(),
        Ok(Err(error)) => {
            warn!(%error, "custom keyword rejected");
            error_response(StatusCode::BAD_REQUEST, error.to_string())
        }
        Err(response) => response,
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RemoveKeywordRequest {
    category: String,
    keyword: String,
}

pub(crate) async fn remove_keyword(
    State(state): State<AppState>,
    Json(payload): Json<RemoveKeywordRequest>,
) -> impl IntoResponse {
    state.telemetry().record_admin_invocation("keyword_remove");
    let predictor = state.predictor();
    match run_blocking(move || predictor.remove_custom_keyword(&payload.category, &payload.keyword))
        .await
    {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error_response(StatusCode::NOT_FOUND, "keyword not found"),
        Err(response) => response,
    }
}

pub(crate) async fn add_rule(
    State(state): State<AppState>,
    Json(rule): Json<CustomRule>,
) -> impl IntoResponse {
    state.telemetry().record_admin_invocation("rule_add");
    let predictor = state.predictor();
    match run_blocking(move || predictor.add_custom_rule(rule)).await {
        Ok(Ok(())) => StatusCode::CREATED.into_response(),
        Ok(Err(error)) => {
            warn!(%error, "custom rule rejected");
            error_response(StatusCode::BAD_REQUEST, error.to_string())
        }
        Err(response) => response,
    }
}

pub(crate) async fn remove_rule(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    state.telemetry().record_admin_invocation("rule_remove");
    let predictor = state.predictor();
    match run_blocking(move || predictor.remove_custom_rule(&name)).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error_response(StatusCode::NOT_FOUND, "rule not found"),
        Err(response) => response,
    }
}
