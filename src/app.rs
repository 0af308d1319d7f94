use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;

use crate::{api, config::Config, observability::Telemetry, predictor::TagPredictor};

#[derive(Clone)]
pub(crate) struct AppState {
    registry: Arc<ComponentRegistry>,
}

pub struct ComponentRegistry {
    config: Arc<Config>,
    telemetry: Telemetry,
    predictor: Arc<TagPredictor>,
}

impl AppState {
    pub(crate) fn new(registry: ComponentRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub(crate) fn telemetry(&self) -> &Telemetry {
        &self.registry.telemetry
    }

    pub(crate) fn predictor(&self) -> Arc<TagPredictor> {
        Arc::clone(&self.registry.predictor)
    }
}

impl ComponentRegistry {
    /// 構成情報から Telemetry と分類器を初期化し、共有レジストリを構築する。
    ///
    /// # Errors
    /// Telemetry の初期化、設定ファイルの読み込み、分類器の構築に失敗した場合。
    pub fn build(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let telemetry = Telemetry::new()?;
        let predictor = TagPredictor::from_config(&config, telemetry.metrics())
            .context("failed to build tag predictor")?;

        Ok(Self {
            config,
            telemetry,
            predictor: Arc::new(predictor),
        })
    }

    /// 構築済みの部品からレジストリを組み立てる。
    #[must_use]
    pub fn from_parts(config: Config, telemetry: Telemetry, predictor: TagPredictor) -> Self {
        Self {
            config: Arc::new(config),
            telemetry,
            predictor: Arc::new(predictor),
        }
    }

    #[must_use]
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    #[must_use]
    pub fn predictor(&self) -> Arc<TagPredictor> {
        Arc::clone(&self.predictor)
    }
}

pub fn build_router(registry: ComponentRegistry) -> Router {
    let state = AppState::new(registry);
    api::router(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ENV_MUTEX;

    #[test]
    fn component_registry_builds_from_env() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = {
            let _lock = ENV_MUTEX.lock().expect("env mutex");
            // SAFETY: test code adjusts deterministic environment state sequentially.
            unsafe {
                std::env::set_var("TAG_CLASSIFIER_DATA_DIR", dir.path());
                std::env::set_var("TAG_CLASSIFIER_LOCAL_AI_DISABLED", "true");
                std::env::remove_var("TAG_CLASSIFIER_SETTINGS_PATH");
            }
            let config = Config::from_env().expect("config loads");
            // SAFETY: see above.
            unsafe {
                std::env::remove_var("TAG_CLASSIFIER_DATA_DIR");
                std::env::remove_var("TAG_CLASSIFIER_LOCAL_AI_DISABLED");
            }
            config
        };

        let registry = ComponentRegistry::build(config).expect("registry builds");
        assert_eq!(registry.config().data_dir(), dir.path());
        let state = AppState::new(registry);
        state.telemetry().record_ready_probe();
        assert!(state.predictor().is_ready());
    }
}
