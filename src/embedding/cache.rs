//! タグ埋め込みのディスクキャッシュ。
//!
//! 期限切れのエントリは参照時に破棄する。モデル名が一致しないエントリはミス扱い。
//! 上限を超えた分は最も長く参照されていないものから捨てる。
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::classification::normalize_tag;
use crate::util::lru_store::{Expiring, PersistentLru};
use crate::util::time::{days_to_secs, unix_now};

/// 既定の有効期間（日）。
pub const DEFAULT_TTL_DAYS: u64 = 30;

/// キャッシュの1エントリ。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEmbedding {
    pub tag: String,
    pub embedding: Vec<f32>,
    pub model_name: String,
    pub created_at: i64,
    pub expires_at: i64,
}

impl Expiring for CachedEmbedding {
    fn expires_at(&self) -> i64 {
        self.expires_at
    }
}

/// 埋め込みキャッシュ。
#[derive(Debug)]
pub struct EmbeddingCache {
    ttl_secs: i64,
    store: PersistentLru<CachedEmbedding>,
}

impl EmbeddingCache {
    /// 永続化しないキャッシュ。
    #[must_use]
    pub fn in_memory(ttl_days: u64, max_entries: Option<usize>) -> Self {
        Self {
            ttl_secs: days_to_secs(ttl_days),
            store: PersistentLru::in_memory("embedding", max_entries),
        }
    }

    /// ファイルから読み込む。壊れたファイルは空として扱う。
    #[must_use]
    pub fn load(path: impl Into<PathBuf>, ttl_days: u64, max_entries: Option<usize>) -> Self {
        Self {
            ttl_secs: days_to_secs(ttl_days),
            store: PersistentLru::load("embedding", path, max_entries, unix_now()),
        }
    }

    /// 何件登録するごとにファイルへ書き出すか。
    #[must_use]
    pub fn with_persist_interval(mut self, interval: usize) -> Self {
        self.store = self.store.with_persist_interval(interval);
        self
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.store.path()
    }

    /// 現在時刻でのキャッシュ参照。
    #[must_use]
    pub fn get(&self, tag: &str, model_name: &str) -> Option<Vec<f32>> {
        self.get_at(tag, model_name, unix_now())
    }

    /// 指定時刻でのキャッシュ参照。期限切れは削除してミスを返す。
    #[must_use]
    pub fn get_at(&self, tag: &str, model_name: &str, now: i64) -> Option<Vec<f32>> {
        self.store
            .get(&normalize_tag(tag), now)
            .filter(|entry| entry.model_name == model_name)
            .map(|entry| entry.embedding)
    }

    /// 現在時刻で登録する。
    pub fn insert(&self, tag: &str, model_name: &str, embedding: Vec<f32>) {
        self.insert_at(tag, model_name, embedding, unix_now());
    }

    /// 指定時刻で登録する。
    pub fn insert_at(&self, tag: &str, model_name: &str, embedding: Vec<f32>, now: i64) {
        let key = normalize_tag(tag);
        self.store.insert(
            key.clone(),
            CachedEmbedding {
                tag: key,
                embedding,
                model_name: model_name.to_string(),
                created_at: now,
                expires_at: now.saturating_add(self.ttl_secs),
            },
        );
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// 上限。上限なしなら `None`。
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.store.capacity()
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    /// 期限切れを捨ててファイルへ保存する。
    pub fn flush(&self) {
        self.store.flush(unix_now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: i64 = 86_400;

    #[test]
    fn hit_returns_stored_vector() {
        let cache = EmbeddingCache::in_memory(DEFAULT_TTL_DAYS, None);
        cache.insert_at("Hair", "model-a", vec![0.25, -0.5], 0);
        assert_eq!(cache.get_at("hair", "model-a", DAY), Some(vec![0.25, -0.5]));
    }

    #[test]
    fn model_mismatch_is_a_miss_but_keeps_entry() {
        let cache = EmbeddingCache::in_memory(DEFAULT_TTL_DAYS, None);
        cache.insert_at("hair", "model-a", vec![1.0], 0);
        assert_eq!(cache.get_at("hair", "model-b", 1), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn expired_entry_is_dropped_lazily() {
        let cache = EmbeddingCache::in_memory(30, None);
        cache.insert_at("hair", "model-a", vec![1.0], 0);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_at("hair", "model-a", 30 * DAY), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn lru_cap_evicts_least_recently_used() {
        let cache = EmbeddingCache::in_memory(30, Some(2));
        cache.insert_at("a1", "m", vec![1.0], 0);
        cache.insert_at("b1", "m", vec![2.0], 0);
        assert!(cache.get_at("a1", "m", 1).is_some());
        cache.insert_at("c1", "m", vec![3.0], 0);

        assert_eq!(cache.len(), 2);
        assert!(cache.get_at("b1", "m", 1).is_none());
        assert!(cache.get_at("a1", "m", 1).is_some());
    }

    #[test]
    fn flush_and_reload_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tag_embeddings_cache.json");
        let cache = EmbeddingCache::load(&path, 30, None);
        cache.insert("hair", "hash-fallback-384", vec![0.5, 0.5]);
        cache.flush();

        let reloaded = EmbeddingCache::load(&path, 30, None);
        assert_eq!(reloaded.get("hair", "hash-fallback-384"), Some(vec![0.5, 0.5]));
    }

    #[test]
    fn vectors_survive_reload_without_flush() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tag_embeddings_cache.json");
        let cache = EmbeddingCache::load(&path, 30, None).with_persist_interval(1);
        cache.insert("ribbon", "model-a", vec![0.1, 0.9]);
        drop(cache);

        let reloaded = EmbeddingCache::load(&path, 30, None);
        assert_eq!(reloaded.get("ribbon", "model-a"), Some(vec![0.1, 0.9]));
    }

    #[test]
    fn corrupt_file_starts_empty_and_is_kept() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tag_embeddings_cache.json");
        std::fs::write(&path, "{not json").expect("write");
        let cache = EmbeddingCache::load(&path, 30, None);
        assert!(cache.is_empty());
        assert!(path.exists());
    }
}
