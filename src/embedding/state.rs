//! ニューラルモデルの読み込み状態機械。
//!
//! `Uninitialized → Loading → Ready | Errored` の一方向遷移。終端状態からは
//! 明示的な [`NeuralModel::reset`] でのみ戻る。読み込みは専用スレッドで行い、
//! 呼び出し側を待たせない。
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::EmbeddingError;
use super::models::ModelSpec;
use super::neural::{DeviceOptions, EncoderLoader, SentenceEncoder};
use crate::util::retry::LoadRetryPolicy;

/// 読み込み状態。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum ModelStatus {
    Uninitialized,
    Loading,
    Ready,
    Errored(String),
}

impl ModelStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Errored(_))
    }
}

struct State {
    status: ModelStatus,
    encoder: Option<Arc<dyn SentenceEncoder>>,
}

/// 非同期に読み込まれる文埋め込みモデル。
pub struct NeuralModel {
    spec: ModelSpec,
    state: Mutex<State>,
    changed: Condvar,
    error_logged: AtomicBool,
}

impl fmt::Debug for NeuralModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NeuralModel")
            .field("model", &self.spec.name)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl NeuralModel {
    #[must_use]
    pub fn new(spec: ModelSpec) -> Self {
        Self {
            spec,
            state: Mutex::new(State {
                status: ModelStatus::Uninitialized,
                encoder: None,
            }),
            changed: Condvar::new(),
            error_logged: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    #[must_use]
    pub fn status(&self) -> ModelStatus {
        self.state.lock().status.clone()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state.lock().status == ModelStatus::Ready
    }

    /// 準備完了ならエンコーダを返す。
    #[must_use]
    pub fn encoder(&self) -> Option<Arc<dyn SentenceEncoder>> {
        let state = self.state.lock();
        match state.status {
            ModelStatus::Ready => state.encoder.clone(),
            _ => None,
        }
    }

    /// 読み込みスレッドを起動する。`Uninitialized` 以外では何もせず `false`。
    pub fn start(
        self: &Arc<Self>,
        loader: EncoderLoader,
        options: DeviceOptions,
        retry: LoadRetryPolicy,
    ) -> bool {
        {
            let mut state = self.state.lock();
            if state.status != ModelStatus::Uninitialized {
                return false;
            }
            state.status = ModelStatus::Loading;
        }
        debug!(model = self.spec.name, "starting embedding model load");

        let model = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name("embedding-loader".to_string())
            .spawn(move || {
                let outcome = model.load_with_retry(&loader, options, retry);
                model.settle(outcome);
            });
        if let Err(err) = spawned {
            self.settle(Err(EmbeddingError::LoadFailed(format!(
                "failed to spawn loader thread: {err}"
            ))));
        }
        true
    }

    /// 読み込みが終わるまで最大 `timeout` 待つ。準備完了なら `true`。
    pub fn wait_for_load(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.status == ModelStatus::Loading {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.status == ModelStatus::Ready
    }

    /// 終端状態から `Uninitialized` に戻す。読み込み中は `false`。
    pub fn reset(&self) -> bool {
        let mut state = self.state.lock();
        if state.status == ModelStatus::Loading {
            return false;
        }
        state.status = ModelStatus::Uninitialized;
        state.encoder = None;
        self.error_logged.store(false, Ordering::Relaxed);
        true
    }

    fn load_with_retry(
        &self,
        loader: &EncoderLoader,
        options: DeviceOptions,
        retry: LoadRetryPolicy,
    ) -> Result<Arc<dyn SentenceEncoder>, EmbeddingError> {
        self.spec.ensure_commercial_use()?;

        let mut attempt = 0;
        loop {
            let delay = retry.delay_for_attempt(attempt);
            if !delay.is_zero() {
                debug!(attempt, delay_ms = delay.as_millis(), "waiting before model load retry");
                std::thread::sleep(delay);
            }

            match self.load_once(loader, options) {
                Ok(encoder) => return Ok(encoder),
                Err(err) if err.is_retryable() && retry.can_attempt(attempt + 1) => {
                    warn!(
                        model = self.spec.name,
                        attempt,
                        error = %err,
                        "embedding model load failed; will retry"
                    );
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// 読み込みと1件のウォームアップ推論。
    fn load_once(
        &self,
        loader: &EncoderLoader,
        options: DeviceOptions,
    ) -> Result<Arc<dyn SentenceEncoder>, EmbeddingError> {
        let encoder: Arc<dyn SentenceEncoder> = Arc::from(loader(&self.spec, options)?);
        let warmup = encoder
            .encode(&["warmup".to_string()])
            .map_err(|err| EmbeddingError::LoadFailed(format!("warm-up embed failed: {err:#}")))?;
        if warmup.first().is_none_or(Vec::is_empty) {
            return Err(EmbeddingError::LoadFailed(
                "warm-up embed returned no vector".to_string(),
            ));
        }
        Ok(encoder)
    }

    fn settle(&self, outcome: Result<Arc<dyn SentenceEncoder>, EmbeddingError>) {
        let mut state = self.state.lock();
        match outcome {
            Ok(encoder) => {
                info!(
                    model = encoder.model_name(),
                    dimension = encoder.dimension(),
                    "embedding model ready"
                );
                state.encoder = Some(encoder);
                state.status = ModelStatus::Ready;
            }
            Err(err) => {
                if !self.error_logged.swap(true, Ordering::Relaxed) {
                    warn!(
                        model = self.spec.name,
                        error = %err,
                        "embedding model unavailable; using hash fallback"
                    );
                }
                state.encoder = None;
                state.status = ModelStatus::Errored(err.to_string());
            }
        }
        drop(state);
        self.changed.notify_all();
    }
}
