//! タグ間類似度の計算とキャッシュ。
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::classification::normalize_tag;
use crate::embedding::{Embedding, EmbeddingProvider};
use crate::util::lru_store::{Expiring, PersistentLru};
use crate::util::time::{days_to_secs, unix_now};

/// 既定の有効期間（日）。
pub const DEFAULT_TTL_DAYS: u64 = 7;
/// 既定の上限件数。
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// 類似度の計算方式。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMethod {
    #[default]
    Cosine,
    Euclidean,
    Dot,
}

impl SimilarityMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Euclidean => "euclidean",
            Self::Dot => "dot",
        }
    }

    /// 2つのベクトルに適用する。長さが異なる場合は 0.0。
    #[must_use]
    pub fn apply(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Cosine => cosine(a, b),
            Self::Euclidean => euclidean(a, b),
            Self::Dot => dot(a, b),
        }
    }
}

impl fmt::Display for SimilarityMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SimilarityMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "euclidean" => Ok(Self::Euclidean),
            "dot" => Ok(Self::Dot),
            other => Err(format!("unknown similarity method: {other}")),
        }
    }
}

/// コサイン類似度。どちらかのノルムが0なら 0.0。
#[must_use]
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot_product: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// ユークリッド距離を `1 / (1 + d)` で類似度に変換する。
#[must_use]
pub fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let distance = a
        .iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt();
    1.0 / (1.0 + distance)
}

/// 内積。
#[must_use]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// タグの順序に依存しないキャッシュキー。長さを前置して区切り文字との衝突を防ぐ。
#[must_use]
pub fn cache_key(method: SimilarityMethod, tag1: &str, tag2: &str) -> String {
    let (a, b) = if tag1 <= tag2 { (tag1, tag2) } else { (tag2, tag1) };
    format!("{method}:{}:{a}:{b}", a.len())
}

/// 類似度キャッシュの1エントリ。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSimilarity {
    pub tag1: String,
    pub tag2: String,
    pub similarity: f32,
    pub model_name: String,
    pub method: SimilarityMethod,
    pub created_at: i64,
    pub expires_at: i64,
}

impl Expiring for CachedSimilarity {
    fn expires_at(&self) -> i64 {
        self.expires_at
    }
}

/// 類似度キャッシュ。期限切れは参照時・読み込み時・保存時に破棄し、上限を超えたら
/// 最も長く参照されていないものから捨てる。
#[derive(Debug)]
pub struct SimilarityCache {
    ttl_secs: i64,
    store: PersistentLru<CachedSimilarity>,
}

impl SimilarityCache {
    #[must_use]
    pub fn in_memory(ttl_days: u64, max_entries: Option<usize>) -> Self {
        Self {
            ttl_secs: days_to_secs(ttl_days),
            store: PersistentLru::in_memory("similarity", max_entries),
        }
    }

    /// ファイルから読み込む。壊れたファイルは空として扱う。
    #[must_use]
    pub fn load(path: impl Into<PathBuf>, ttl_days: u64, max_entries: Option<usize>) -> Self {
        Self {
            ttl_secs: days_to_secs(ttl_days),
            store: PersistentLru::load("similarity", path, max_entries, unix_now()),
        }
    }

    /// 何件登録するごとにファイルへ書き出すか。
    #[must_use]
    pub fn with_persist_interval(mut self, interval: usize) -> Self {
        self.store = self.store.with_persist_interval(interval);
        self
    }

    #[must_use]
    pub fn get_at(&self, key: &str, model_name: &str, now: i64) -> Option<f32> {
        self.store
            .get(key, now)
            .filter(|entry| entry.model_name == model_name)
            .map(|entry| entry.similarity)
    }

    pub fn insert_at(&self, key: String, entry: CachedSimilarity) {
        self.store.insert(key, entry);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.store.capacity()
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    pub fn flush(&self) {
        self.store.flush(unix_now());
    }
}

/// 埋め込みに基づく類似度エンジン。
#[derive(Debug)]
pub struct SimilarityEngine {
    provider: Arc<EmbeddingProvider>,
    cache: SimilarityCache,
}

impl SimilarityEngine {
    #[must_use]
    pub fn new(provider: Arc<EmbeddingProvider>, cache: SimilarityCache) -> Self {
        Self { provider, cache }
    }

    #[must_use]
    pub fn cache(&self) -> &SimilarityCache {
        &self.cache
    }

    /// 2つのタグの類似度。
    #[must_use]
    pub fn similarity(&self, tag1: &str, tag2: &str, method: SimilarityMethod) -> f32 {
        self.similarity_at(tag1, tag2, method, unix_now())
    }

    #[must_use]
    pub fn similarity_at(&self, tag1: &str, tag2: &str, method: SimilarityMethod, now: i64) -> f32 {
        let a = normalize_tag(tag1);
        let b = normalize_tag(tag2);
        let key = cache_key(method, &a, &b);
        let expected_model = self.provider.active_model_name();
        if let Some(similarity) = self.cache.get_at(&key, &expected_model, now) {
            return similarity;
        }

        let (first, second) = self.embed_pair(&a, &b);
        let similarity = method.apply(&first.vector, &second.vector);
        let (tag1, tag2) = if a <= b { (a, b) } else { (b, a) };
        self.cache.insert_at(
            key,
            CachedSimilarity {
                tag1,
                tag2,
                similarity,
                model_name: first.model_name,
                method,
                created_at: now,
                expires_at: now.saturating_add(self.cache.ttl_secs),
            },
        );
        similarity
    }

    /// 同じモデルのベクトル対を返す。片方だけ代替された場合は両方ハッシュにそろえる。
    fn embed_pair(&self, a: &str, b: &str) -> (Embedding, Embedding) {
        let first = self.provider.embed(a);
        let second = self.provider.embed(b);
        if first.model_name == second.model_name {
            (first, second)
        } else {
            (self.provider.hash_embed(a), self.provider.hash_embed(b))
        }
    }

    pub fn flush(&self) {
        self.cache.flush();
    }
}
