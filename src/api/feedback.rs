use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::{error_response, run_blocking};
use crate::app::AppState;
use crate::classification::validate_tag;

#[derive(Debug, Deserialize)]
pub(crate) struct FeedbackRequest {
    tag: String,
    predicted: String,
    #[serde(default)]
    actual: Option<String>,
    #[serde(default)]
    peers: Vec<String>,
}

#[derive(Debug, Serialize)]
struct FeedbackResponse {
    recorded: bool,
}

pub(crate) async fn record(
    State(state): State<AppState>,
    Json(payload): Json<FeedbackRequest>,
) -> impl IntoResponse {
    if let Err(error) = validate_tag(&payload.tag) {
        return error_response(StatusCode::BAD_REQUEST, error.to_string());
    }

    let predictor = state.predictor();
    let result = run_blocking(move || {
        predictor.record_prediction_result(
            &payload.tag,
            &payload.predicted,
            payload.actual.as_deref(),
            &payload.peers,
        )
    })
    .await;

    match result {
        Ok(recorded) => {
            debug!(recorded, "feedback handled");
            (StatusCode::OK, Json(FeedbackResponse { recorded })).into_response()
        }
        Err(response) => response,
    }
}

pub(crate) async fn statistics(
    State(state): State<AppState>,
    Path(tag): Path<String>,
) -> impl IntoResponse {
    if let Err(error) = validate_tag(&tag) {
        return error_response(StatusCode::BAD_REQUEST, error.to_string());
    }
    (StatusCode::OK, Json(state.predictor().tag_statistics(&tag))).into_response()
}
