//! タグ埋め込みの提供。
//!
//! ニューラルモデルが準備完了ならそれを使い、そうでなければハッシュ埋め込みで代替する。
//! どちらのベクトルも同じディスクキャッシュに `model_name` 付きで保存する。
use std::sync::Arc;
use std::time::Duration;

use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

pub mod cache;
pub mod hash;
pub mod models;
pub mod neural;
pub mod state;

pub use cache::EmbeddingCache;
pub use hash::HashEmbedder;
pub use models::ModelSpec;
pub use neural::{DeviceOptions, EncoderLoader, SentenceEncoder, default_loader, encoder_loader};
pub use state::{ModelStatus, NeuralModel};

use crate::classification::normalize_tag;
use crate::similarity::cosine;
use crate::util::retry::LoadRetryPolicy;

/// 埋め込み処理のエラー。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmbeddingError {
    #[error("embedding model is not ready")]
    NotReady,
    #[error("failed to load embedding model: {0}")]
    LoadFailed(String),
    #[error("model {model} is not licensed for commercial use ({license})")]
    LicenseRejected { model: String, license: String },
    #[error("unknown embedding model: {0}")]
    UnknownModel(String),
    #[error("neural backend not compiled in")]
    BackendUnavailable,
    #[error("failed to encode: {0}")]
    EncodeFailed(String),
}

impl EmbeddingError {
    /// 再試行で回復しうるか。
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LoadFailed(_))
    }
}

/// 現在ベクトルを生成している方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingMode {
    Neural,
    HashFallback,
}

/// 生成元モデル名付きのベクトル。
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub model_name: String,
}

/// 埋め込みプロバイダ。
#[derive(Debug)]
pub struct EmbeddingProvider {
    hash: HashEmbedder,
    neural: Option<Arc<NeuralModel>>,
    cache: EmbeddingCache,
    /// 読み込み中のモデルを待つ時間
    load_wait: Duration,
}

impl EmbeddingProvider {
    /// ハッシュ埋め込みのみのプロバイダ。
    #[must_use]
    pub fn hash_only(hash: HashEmbedder, cache: EmbeddingCache) -> Self {
        Self {
            hash,
            neural: None,
            cache,
            load_wait: Duration::ZERO,
        }
    }

    /// ニューラルモデルを持つプロバイダ。読み込みは [`Self::start_loading`] で開始する。
    #[must_use]
    pub fn with_neural(
        spec: ModelSpec,
        hash: HashEmbedder,
        cache: EmbeddingCache,
        load_wait: Duration,
    ) -> Self {
        Self {
            hash,
            neural: Some(Arc::new(NeuralModel::new(spec))),
            cache,
            load_wait,
        }
    }

    /// ニューラルモデルの読み込みを開始する。ハッシュのみの場合は `false`。
    pub fn start_loading(
        &self,
        loader: EncoderLoader,
        options: DeviceOptions,
        retry: LoadRetryPolicy,
    ) -> bool {
        match &self.neural {
            Some(model) => model.start(loader, options, retry),
            None => false,
        }
    }

    /// ニューラルモデルの状態。ハッシュのみの場合は `None`。
    #[must_use]
    pub fn neural_status(&self) -> Option<ModelStatus> {
        self.neural.as_ref().map(|model| model.status())
    }

    #[must_use]
    pub fn neural_ready(&self) -> bool {
        self.neural.as_ref().is_some_and(|model| model.is_ready())
    }

    #[must_use]
    pub fn neural_errored(&self) -> bool {
        matches!(self.neural_status(), Some(ModelStatus::Errored(_)))
    }

    /// 利用方式が確定しているか。ハッシュのみ、または読み込みが終端状態なら `true`。
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.neural_status().is_none_or(|status| status.is_terminal())
    }

    #[must_use]
    pub fn mode(&self) -> EmbeddingMode {
        if self.neural_ready() {
            EmbeddingMode::Neural
        } else {
            EmbeddingMode::HashFallback
        }
    }

    /// 読み込み完了を最大 `timeout` 待つ。ニューラルが準備完了なら `true`。
    pub fn wait_for_load(&self, timeout: Duration) -> bool {
        self.neural
            .as_ref()
            .is_some_and(|model| model.wait_for_load(timeout))
    }

    /// ニューラルエンコーダ。読み込み中なら設定された時間だけ待つ。
    fn encoder(&self) -> Option<Arc<dyn SentenceEncoder>> {
        let model = self.neural.as_ref()?;
        if model.status() == ModelStatus::Loading && !self.load_wait.is_zero() {
            model.wait_for_load(self.load_wait);
        }
        model.encoder()
    }

    /// 現在の方式で生成されるベクトルのモデル名。
    #[must_use]
    pub fn active_model_name(&self) -> String {
        self.neural
            .as_ref()
            .and_then(|model| model.encoder())
            .map_or_else(|| self.hash.model_name(), |encoder| encoder.model_name().to_string())
    }

    #[must_use]
    pub fn hash_embedder(&self) -> &HashEmbedder {
        &self.hash
    }

    #[must_use]
    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    /// 現在の方式でタグを埋め込む。推論に失敗した場合はハッシュ埋め込みを返す。
    #[must_use]
    pub fn embed(&self, tag: &str) -> Embedding {
        if let Some(encoder) = self.encoder() {
            let texts = [normalize_tag(tag)];
            match self.encode_cached(encoder.as_ref(), &texts) {
                Ok(mut vectors) => {
                    if let Some(vector) = vectors.pop() {
                        return Embedding {
                            vector,
                            model_name: encoder.model_name().to_string(),
                        };
                    }
                }
                Err(err) => debug!(tag, error = %err, "neural embed failed; using hash fallback"),
            }
        }
        self.hash_embed(tag)
    }

    /// ハッシュ方式で埋め込む（キャッシュ経由）。
    #[must_use]
    pub fn hash_embed(&self, tag: &str) -> Embedding {
        let model_name = self.hash.model_name();
        let vector = match self.cache.get(tag, &model_name) {
            Some(vector) => vector,
            None => {
                let vector = self.hash.embed(tag);
                self.cache.insert(tag, &model_name, vector.clone());
                vector
            }
        };
        Embedding { vector, model_name }
    }

    /// ニューラルモデルでまとめて埋め込む。キャッシュにない分だけ推論する。
    ///
    /// # Errors
    /// モデルが準備完了でない、または推論に失敗した場合。
    pub fn neural_embed_batch(&self, tags: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let encoder = self.encoder().ok_or(EmbeddingError::NotReady)?;
        let texts: Vec<String> = tags.iter().map(|tag| normalize_tag(tag)).collect();
        self.encode_cached(encoder.as_ref(), &texts)
    }

    fn encode_cached(
        &self,
        encoder: &dyn SentenceEncoder,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let model_name = encoder.model_name();
        let mut vectors: Vec<Option<Vec<f32>>> = texts
            .iter()
            .map(|text| self.cache.get(text, model_name))
            .collect();

        let missing: Vec<usize> = (0..texts.len()).filter(|&i| vectors[i].is_none()).collect();
        if !missing.is_empty() {
            let inputs: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let encoded = encoder
                .encode(&inputs)
                .map_err(|err| EmbeddingError::EncodeFailed(format!("{err:#}")))?;
            if encoded.len() != inputs.len() {
                return Err(EmbeddingError::EncodeFailed(format!(
                    "expected {} vectors, got {}",
                    inputs.len(),
                    encoded.len()
                )));
            }
            for (index, vector) in missing.into_iter().zip(encoded) {
                self.cache.insert(&texts[index], model_name, vector.clone());
                vectors[index] = Some(vector);
            }
        }

        Ok(vectors.into_iter().flatten().collect())
    }

    /// 候補の中から類似タグを探す。`threshold` 以上を降順に最大 `limit` 件。
    ///
    /// # Errors
    /// ニューラルモデルが準備完了でない、または推論に失敗した場合。
    pub fn find_similar(
        &self,
        tag: &str,
        candidates: &[String],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<(String, f32)>, EmbeddingError> {
        let query = normalize_tag(tag);
        let candidates: Vec<String> = candidates
            .iter()
            .map(|candidate| normalize_tag(candidate))
            .filter(|candidate| !candidate.is_empty() && *candidate != query)
            .collect();
        if candidates.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut texts = Vec::with_capacity(candidates.len() + 1);
        texts.push(query);
        texts.extend(candidates.iter().cloned());
        let vectors = self.neural_embed_batch(&texts)?;
        let Some((query_vector, candidate_vectors)) = vectors.split_first() else {
            return Err(EmbeddingError::EncodeFailed("no vectors returned".to_string()));
        };

        let mut scored: Vec<(String, f32)> = candidates
            .par_iter()
            .zip(candidate_vectors.par_iter())
            .map(|(candidate, vector)| (candidate.clone(), cosine(query_vector, vector)))
            .filter(|(_, similarity)| *similarity >= threshold)
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(limit);
        Ok(scored)
    }

    /// 既知タグをまとめてキャッシュに載せる。載せた件数を返す。
    pub fn warm_cache(&self, tags: &[String]) -> usize {
        if self.neural_ready() {
            return match self.neural_embed_batch(tags) {
                Ok(vectors) => vectors.len(),
                Err(err) => {
                    debug!(error = %err, "neural cache warm-up failed");
                    0
                }
            };
        }

        let model_name = self.hash.model_name();
        let missing: Vec<String> = tags
            .iter()
            .filter(|tag| self.cache.get(tag, &model_name).is_none())
            .cloned()
            .collect();
        let vectors = self.hash.embed_batch(&missing);
        for (tag, vector) in missing.iter().zip(vectors) {
            self.cache.insert(tag, &model_name, vector);
        }
        missing.len()
    }

    /// 読み込み完了後にバックグラウンドでキャッシュを温める。
    pub fn spawn_warm_up(self: &Arc<Self>, tags: Vec<String>, bound: Duration) {
        if self.neural.is_none() {
            return;
        }
        let provider = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name("embedding-warmup".to_string())
            .spawn(move || {
                if provider.wait_for_load(bound) {
                    let warmed = provider.warm_cache(&tags);
                    info!(tags = warmed, "embedding cache warmed");
                }
            });
        if let Err(err) = spawned {
            debug!(error = %err, "failed to spawn embedding warm-up thread");
        }
    }

    pub fn flush(&self) {
        self.cache.flush();
    }
}
