use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};

use crate::api::{error_response, run_blocking};
use crate::app::AppState;
use crate::predictor::DEFAULT_TOP_N;
use crate::similarity::SimilarityMethod;

/// 類似タグ候補の既定件数。
const DEFAULT_SUGGEST_LIMIT: usize = 5;

#[derive(Debug, Deserialize)]
pub(crate) struct PredictRequest {
    tag: String,
    #[serde(default)]
    peers: Vec<String>,
    #[serde(default)]
    threshold: Option<f64>,
    #[serde(default)]
    top_n: Option<usize>,
}

pub(crate) async fn predict(
    State(state): State<AppState>,
    Json(payload): Json<PredictRequest>,
) -> impl IntoResponse {
    let predictor = state.predictor();
    let result = run_blocking(move || {
        let threshold = payload
            .threshold
            .unwrap_or_else(|| predictor.default_threshold());
        predictor.predict_with(
            &payload.tag,
            &payload.peers,
            threshold,
            payload.top_n.unwrap_or(DEFAULT_TOP_N),
        )
    })
    .await;

    match result {
        Ok(prediction) => (StatusCode::OK, Json(prediction)).into_response(),
        Err(response) => response,
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SuggestRequest {
    tag: String,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct Suggestion {
    tag: String,
    similarity: f32,
}

#[derive(Debug, Serialize)]
struct SuggestResponse {
    tag: String,
    suggestions: Vec<Suggestion>,
}

pub(crate) async fn suggest(
    State(state): State<AppState>,
    Json(payload): Json<SuggestRequest>,
) -> impl IntoResponse {
    let predictor = state.predictor();
    let tag = payload.tag.clone();
    let limit = payload.limit.unwrap_or(DEFAULT_SUGGEST_LIMIT);
    let result = run_blocking(move || predictor.suggest_similar(&payload.tag, limit)).await;

    match result {
        Ok(similar) => {
            let body = Json(SuggestResponse {
                tag,
                suggestions: similar
                    .into_iter()
                    .map(|(tag, similarity)| Suggestion { tag, similarity })
                    .collect(),
            });
            (StatusCode::OK, body).into_response()
        }
        Err(response) => response,
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SimilarityRequest {
    tag1: String,
    tag2: String,
    #[serde(default)]
    method: Option<String>,
}

#[derive(Debug, Serialize)]
struct SimilarityResponse {
    tag1: String,
    tag2: String,
    method: SimilarityMethod,
    similarity: f32,
}

pub(crate) async fn similarity(
    State(state): State<AppState>,
    Json(payload): Json<SimilarityRequest>,
) -> impl IntoResponse {
    let method = match payload.method.as_deref().map(str::parse::<SimilarityMethod>) {
        None => SimilarityMethod::default(),
        Some(Ok(method)) => method,
        Some(Err(error)) => return error_response(StatusCode::BAD_REQUEST, error),
    };

    let predictor = state.predictor();
    let SimilarityRequest { tag1, tag2, .. } = payload;
    let (left, right) = (tag1.clone(), tag2.clone());
    let result = run_blocking(move || predictor.similarity(&left, &right, method)).await;

    match result {
        Ok(similarity) => {
            let body = Json(SimilarityResponse {
                tag1,
                tag2,
                method,
                similarity,
            });
            (StatusCode::OK, body).into_response()
        }
        Err(response) => response,
    }
}
