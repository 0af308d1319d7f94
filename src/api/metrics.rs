use axum::{
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};
use prometheus::TEXT_FORMAT;

use crate::app::AppState;

pub(crate) async fn exporter(State(state): State<AppState>) -> impl IntoResponse {
    let body = state.telemetry().render_prometheus();
    (StatusCode::OK, [(header::CONTENT_TYPE, TEXT_FORMAT)], body)
}
