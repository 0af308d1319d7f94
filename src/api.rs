pub(crate) mod admin;
pub(crate) mod feedback;
pub(crate) mod health;
pub(crate) mod metrics;
pub(crate) mod predict;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::Serialize;
use tracing::error;

use crate::app::AppState;

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/health/ready", get(health::ready))
        .route("/health/live", get(health::live))
        .route("/metrics", get(metrics::exporter))
        .route("/v1/predict", post(predict::predict))
        .route("/v1/suggest", post(predict::suggest))
        .route("/v1/similarity", post(predict::similarity))
        .route("/v1/feedback", post(feedback::record))
        .route("/v1/tags/{tag}/stats", get(feedback::statistics))
        .route("/admin/cache/clear", post(admin::clear_cache))
        .route("/admin/cache/stats", get(admin::cache_stats))
        .route("/admin/test-tags/cleanup", post(admin::cleanup_test_tags))
        .route(
            "/admin/keywords",
            post(admin::add_keyword).delete(admin::remove_keyword),
        )
        .route("/admin/rules", post(admin::add_rule))
        .route("/admin/rules/{name}", delete(admin::remove_rule))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    error: String,
}

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let body = Json(ErrorResponse {
        error: message.into(),
    });
    (status, body).into_response()
}

/// CPU を使う分類器の呼び出しをブロッキングスレッドで実行する。
pub(crate) async fn run_blocking<F, T>(task: F) -> Result<T, Response>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task).await.map_err(|error| {
        error!(%error, "blocking classifier task failed");
        error_response(StatusCode::INTERNAL_SERVER_ERROR, "classifier task failed")
    })
}
