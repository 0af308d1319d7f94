//! 挿入順で追い出す予測キャッシュ。
//!
//! 参照しても順序は変わらない。容量を超えると最も古く挿入されたものから捨てる。
//! 無効化のたびに世代を進め、無効化より前に計算を始めた結果は登録しない。
use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::classification::normalize_tag;

/// 既定の容量。
pub const DEFAULT_CAPACITY: usize = 1000;

/// 予測入力を表すキャッシュキー。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    tag: String,
    peers: Vec<String>,
    threshold_bits: u64,
    top_n: usize,
}

impl CacheKey {
    /// 共起タグは正規化して並べ替える（順序は結果に影響しない）。
    #[must_use]
    pub fn new(tag: &str, peers: &[String], threshold: f64, top_n: usize) -> Self {
        let mut peers: Vec<String> = peers.iter().map(|peer| normalize_tag(peer)).collect();
        peers.sort_unstable();
        Self {
            tag: normalize_tag(tag),
            peers,
            threshold_bits: threshold.to_bits(),
            top_n,
        }
    }

    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// 対象タグまたは共起タグとして `tag` を含むか。
    #[must_use]
    pub fn touches(&self, tag: &str) -> bool {
        self.tag == tag || self.peers.iter().any(|peer| peer == tag)
    }
}

/// キャッシュ統計。
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub fill_ratio: f64,
    pub hits: u64,
    pub misses: u64,
}

/// FIFO キャッシュ。
#[derive(Debug)]
pub struct PredictionCache<V> {
    capacity: usize,
    order: VecDeque<CacheKey>,
    entries: FxHashMap<CacheKey, V>,
    /// `invalidate_tag` と `clear` のたびに増える
    generation: u64,
    hits: u64,
    misses: u64,
}

impl<V: Clone> PredictionCache<V> {
    /// 容量 0 は 1 として扱う。
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            entries: FxHashMap::default(),
            generation: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// 参照する。ヒット・ミスを数える。
    pub fn get(&mut self, key: &CacheKey) -> Option<V> {
        match self.entries.get(key) {
            Some(value) => {
                self.hits += 1;
                Some(value.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// 登録する。既存キーは値だけ差し替え、順序は保つ。
    pub fn insert(&mut self, key: CacheKey, value: V) {
        if let Some(existing) = self.entries.get_mut(&key) {
            *existing = value;
            return;
        }
        while self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
    }

    /// 現在の世代。計算前に読み、[`Self::insert_if_current`] に渡す。
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 世代が `generation` のままなら登録して `true`。途中で無効化があれば捨てる。
    pub fn insert_if_current(&mut self, key: CacheKey, value: V, generation: u64) -> bool {
        if self.generation != generation {
            return false;
        }
        self.insert(key, value);
        true
    }

    /// `tag` に関わるエントリを捨てる。捨てた件数を返す。
    pub fn invalidate_tag(&mut self, tag: &str) -> usize {
        self.generation += 1;
        let tag = normalize_tag(tag);
        let before = self.order.len();
        let entries = &mut self.entries;
        self.order.retain(|key| {
            if key.touches(&tag) {
                entries.remove(key);
                false
            } else {
                true
            }
        });
        before - self.order.len()
    }

    pub fn clear(&mut self) {
        self.generation += 1;
        self.order.clear();
        self.entries.clear();
    }

    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    /// 挿入順のキー。
    pub fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.order.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        #[allow(clippy::cast_precision_loss)]
        let fill_ratio = self.order.len() as f64 / self.capacity as f64;
        CacheStats {
            size: self.order.len(),
            capacity: self.capacity,
            fill_ratio,
            hits: self.hits,
            misses: self.misses,
        }
    }
}
