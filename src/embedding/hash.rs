//! MD5 ダイジェストから決定的に生成する軽量埋め込み。
//!
//! 同じタグは常に同じベクトルになる。乱数生成器のシードもダイジェスト由来。
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::classification::normalize_tag;

/// 次元数の下限。
pub const MIN_DIMENSION: usize = 128;
/// 次元数の上限（既定値）。
pub const MAX_DIMENSION: usize = 384;

/// ハッシュ埋め込み器。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashEmbedder {
    dimension: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(MAX_DIMENSION)
    }
}

impl HashEmbedder {
    /// 次元数は [128, 384] に丸める。
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.clamp(MIN_DIMENSION, MAX_DIMENSION),
        }
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// キャッシュで使うモデル名。
    #[must_use]
    pub fn model_name(&self) -> String {
        format!("hash-fallback-{}", self.dimension)
    }

    /// 正規化したタグを埋め込む。
    #[must_use]
    pub fn embed(&self, tag: &str) -> Vec<f32> {
        let normalized = normalize_tag(tag);
        let digest = md5::compute(normalized.as_bytes());

        let mut vector = Vec::with_capacity(self.dimension);
        vector.extend(digest.0.iter().map(|byte| f32::from(*byte) / 127.5 - 1.0));

        let mut seed = [0_u8; 32];
        seed[..16].copy_from_slice(&digest.0);
        seed[16..].copy_from_slice(&digest.0);
        let mut rng = StdRng::from_seed(seed);
        while vector.len() < self.dimension {
            vector.push(rng.random_range(-1.0_f32..1.0));
        }

        l2_normalize(&mut vector);
        vector
    }

    /// 複数タグを並列に埋め込む。
    #[must_use]
    pub fn embed_batch(&self, tags: &[String]) -> Vec<Vec<f32>> {
        tags.par_iter().map(|tag| self.embed(tag)).collect()
    }
}

fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_is_deterministic_and_normalized() {
        let embedder = HashEmbedder::default();
        let first = embedder.embed("Long Hair");
        let second = embedder.embed("  long hair ");
        assert_eq!(first, second);
        assert_eq!(first.len(), MAX_DIMENSION);

        let norm = first.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn different_tags_differ() {
        let embedder = HashEmbedder::default();
        assert_ne!(embedder.embed("hair"), embedder.embed("hat"));
    }

    #[test]
    fn dimension_is_clamped() {
        assert_eq!(HashEmbedder::new(16).dimension(), MIN_DIMENSION);
        assert_eq!(HashEmbedder::new(4096).dimension(), MAX_DIMENSION);
        assert_eq!(HashEmbedder::new(256).embed("x").len(), 256);
        assert_eq!(HashEmbedder::new(256).model_name(), "hash-fallback-256");
    }

    #[test]
    fn batch_matches_single() {
        let embedder = HashEmbedder::new(128);
        let tags = vec!["red".to_string(), "blue".to_string()];
        let batch = embedder.embed_batch(&tags);
        assert_eq!(batch[0], embedder.embed("red"));
        assert_eq!(batch[1], embedder.embed("blue"));
    }
}
