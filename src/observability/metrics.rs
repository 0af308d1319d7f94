//! Prometheusメトリクス定義。
use std::sync::Arc;

use prometheus::{
    Counter, Gauge, Histogram, Registry, register_counter_with_registry,
    register_gauge_with_registry, register_histogram_with_registry,
};

/// メトリクスコレクター。
#[derive(Debug, Clone)]
pub struct Metrics {
    // カウンター
    pub predictions_override: Counter,
    pub predictions_embedding: Counter,
    pub predictions_keyword: Counter,
    pub predictions_invalid: Counter,
    pub cache_hits: Counter,
    pub cache_misses: Counter,
    pub feedback_total: Counter,
    pub corrections_total: Counter,

    // ヒストグラム
    pub predict_duration: Histogram,

    // ゲージ
    pub prediction_cache_size: Gauge,
    pub embedding_ready: Gauge,
}

impl Metrics {
    /// 新しいメトリクスコレクターを作成する。
    ///
    /// # Errors
    /// 同じレジストリへの二重登録など、登録に失敗した場合。
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            predictions_override: register_counter_with_registry!(
                "tag_classifier_predictions_override_total",
                "Predictions decided by a custom category override",
                registry
            )?,
            predictions_embedding: register_counter_with_registry!(
                "tag_classifier_predictions_embedding_total",
                "Predictions decided by neural similarity",
                registry
            )?,
            predictions_keyword: register_counter_with_registry!(
                "tag_classifier_predictions_keyword_total",
                "Predictions decided by keyword scoring",
                registry
            )?,
            predictions_invalid: register_counter_with_registry!(
                "tag_classifier_predictions_invalid_total",
                "Predictions rejected as invalid input",
                registry
            )?,
            cache_hits: register_counter_with_registry!(
                "tag_classifier_prediction_cache_hits_total",
                "Prediction cache hits",
                registry
            )?,
            cache_misses: register_counter_with_registry!(
                "tag_classifier_prediction_cache_misses_total",
                "Prediction cache misses",
                registry
            )?,
            feedback_total: register_counter_with_registry!(
                "tag_classifier_feedback_total",
                "Prediction results reported back",
                registry
            )?,
            corrections_total: register_counter_with_registry!(
                "tag_classifier_corrections_total",
                "Reported results whose actual category differed from the prediction",
                registry
            )?,
            predict_duration: register_histogram_with_registry!(
                "tag_classifier_predict_duration_seconds",
                "Time spent computing an uncached prediction",
                vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0],
                registry
            )?,
            prediction_cache_size: register_gauge_with_registry!(
                "tag_classifier_prediction_cache_size",
                "Entries currently held in the prediction cache",
                registry
            )?,
            embedding_ready: register_gauge_with_registry!(
                "tag_classifier_embedding_ready",
                "1 when the neural embedding model is ready",
                registry
            )?,
        })
    }

    /// 専用レジストリ付きで作成する。
    ///
    /// # Errors
    /// 登録に失敗した場合。
    pub fn standalone() -> Result<Arc<Self>, prometheus::Error> {
        Ok(Arc::new(Self::new(&Registry::new())?))
    }
}
