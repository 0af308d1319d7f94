//! 文埋め込みエンコーダの抽象と rust-bert 実装。
//!
//! rust-bert は `neural` フィーチャ有効時のみリンクする。無効時のローダーは
//! 常に [`EmbeddingError::BackendUnavailable`] を返す。
use std::sync::Arc;

use super::EmbeddingError;
use super::models::ModelSpec;

/// テンソル配置の指定。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceOptions {
    /// すべて CPU 上に置く
    pub force_cpu: bool,
    /// エンコーダにデバイスを指定しない
    pub skip_device_assignment: bool,
}

/// 文埋め込みエンコーダ。
pub trait SentenceEncoder: Send + Sync {
    fn model_name(&self) -> &str;

    fn dimension(&self) -> usize;

    /// テキストをまとめてベクトル化する。
    ///
    /// # Errors
    /// 推論に失敗した場合。
    fn encode(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// モデル仕様からエンコーダを生成する関数。テストでは偽物を差し込む。
pub type EncoderLoader = Arc<
    dyn Fn(&ModelSpec, DeviceOptions) -> Result<Box<dyn SentenceEncoder>, EmbeddingError>
        + Send
        + Sync,
>;

/// クロージャを [`EncoderLoader`] に包む。
pub fn encoder_loader<F>(loader: F) -> EncoderLoader
where
    F: Fn(&ModelSpec, DeviceOptions) -> Result<Box<dyn SentenceEncoder>, EmbeddingError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(loader)
}

/// ビルド構成に応じた既定のローダー。
#[must_use]
pub fn default_loader() -> EncoderLoader {
    encoder_loader(load_encoder)
}

#[cfg(feature = "neural")]
fn load_encoder(
    spec: &ModelSpec,
    options: DeviceOptions,
) -> Result<Box<dyn SentenceEncoder>, EmbeddingError> {
    let encoder = backend::RustBertEncoder::load(spec, options)?;
    Ok(Box::new(encoder))
}

#[cfg(not(feature = "neural"))]
fn load_encoder(
    _spec: &ModelSpec,
    _options: DeviceOptions,
) -> Result<Box<dyn SentenceEncoder>, EmbeddingError> {
    Err(EmbeddingError::BackendUnavailable)
}

#[cfg(feature = "neural")]
mod backend {
    use anyhow::Context;
    use parking_lot::Mutex;
    use rust_bert::pipelines::sentence_embeddings::{
        SentenceEmbeddingsBuilder, SentenceEmbeddingsModel, SentenceEmbeddingsModelType,
    };
    use tch::Device;
    use tracing::{info, warn};

    use super::{DeviceOptions, EmbeddingError, ModelSpec, SentenceEncoder};

    /// rust-bert の文埋め込みモデル。推論は排他で行う。
    pub(super) struct RustBertEncoder {
        name: String,
        dimension: usize,
        model: Mutex<SentenceEmbeddingsModel>,
    }

    fn model_type(key: &str) -> SentenceEmbeddingsModelType {
        match key {
            "english" => SentenceEmbeddingsModelType::AllMiniLmL12V2,
            "large" => SentenceEmbeddingsModelType::AllDistilrobertaV1,
            _ => SentenceEmbeddingsModelType::DistiluseBaseMultilingualCased,
        }
    }

    fn create(
        spec: &ModelSpec,
        options: DeviceOptions,
        device: Device,
    ) -> Result<SentenceEmbeddingsModel, EmbeddingError> {
        let builder = SentenceEmbeddingsBuilder::remote(model_type(spec.key));
        let builder = if options.skip_device_assignment {
            builder
        } else {
            builder.with_device(device)
        };
        builder
            .create_model()
            .map_err(|err| EmbeddingError::LoadFailed(err.to_string()))
    }

    impl RustBertEncoder {
        pub(super) fn load(spec: &ModelSpec, options: DeviceOptions) -> Result<Self, EmbeddingError> {
            let preferred = if options.force_cpu {
                Device::Cpu
            } else {
                Device::cuda_if_available()
            };

            let model = match create(spec, options, preferred) {
                Ok(model) => model,
                Err(err) if preferred != Device::Cpu => {
                    // meta テンソル等で GPU に載らないモデルがある
                    warn!(model = spec.name, error = %err, "gpu placement failed; retrying on cpu");
                    create(spec, options, Device::Cpu)?
                }
                Err(err) => return Err(err),
            };
            info!(model = spec.name, device = ?preferred, "sentence encoder created");

            Ok(Self {
                name: spec.name.to_string(),
                dimension: spec.dimension,
                model: Mutex::new(model),
            })
        }
    }

    impl SentenceEncoder for RustBertEncoder {
        fn model_name(&self) -> &str {
            &self.name
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn encode(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            self.model
                .lock()
                .encode(texts)
                .context("failed to encode texts")
        }
    }
}
