use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;
use tracing::debug;

use crate::app::AppState;
use crate::embedding::ModelStatus;

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) struct HealthReport {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    embedding: Option<ModelStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl HealthReport {
    fn ready(embedding: Option<ModelStatus>) -> Self {
        Self {
            status: "ready",
            embedding,
            detail: None,
        }
    }

    fn degraded(embedding: Option<ModelStatus>, detail: impl Into<String>) -> Self {
        Self {
            status: "degraded",
            embedding,
            detail: Some(detail.into()),
        }
    }
}

pub(crate) async fn ready(
    State(state): State<AppState>,
) -> Result<Json<HealthReport>, (StatusCode, Json<HealthReport>)> {
    state.telemetry().record_ready_probe();
    let predictor = state.predictor();
    let embedding = predictor.embedding_status();

    if !predictor.is_ready() {
        debug!("embedding model is still loading");
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthReport::degraded(embedding, "embedding model loading")),
        ));
    }

    Ok(Json(HealthReport::ready(embedding)))
}

pub(crate) async fn live(State(state): State<AppState>) -> Json<HealthReport> {
    state.telemetry().record_live_probe();
    Json(HealthReport {
        status: "live",
        embedding: None,
        detail: None,
    })
}
