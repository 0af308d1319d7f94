//! 有効期限付きの LRU ストア。
//!
//! 埋め込みキャッシュと類似度キャッシュが共有する。期限切れは参照時・読み込み時・
//! 保存時に捨てる。一定件数の登録ごとにファイルへ書き出す。
use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use super::persist::{load_json, save_json_atomic};

/// 既定の書き出し間隔（登録件数）。
pub const DEFAULT_PERSIST_INTERVAL: usize = 32;

/// 失効時刻を持つエントリ。
pub trait Expiring {
    /// UNIX秒。この時刻以降は無効。
    fn expires_at(&self) -> i64;
}

struct Inner<V> {
    entries: LruCache<String, V>,
    /// 前回の書き出し以降の登録件数
    pending: usize,
}

/// 永続化付き LRU ストア。
pub struct PersistentLru<V> {
    label: &'static str,
    path: Option<PathBuf>,
    persist_interval: usize,
    inner: Mutex<Inner<V>>,
}

impl<V> fmt::Debug for PersistentLru<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("PersistentLru")
            .field("label", &self.label)
            .field("path", &self.path)
            .field("len", &inner.entries.len())
            .field("cap", &inner.entries.cap())
            .finish_non_exhaustive()
    }
}

fn new_entries<V>(max_entries: Option<usize>) -> LruCache<String, V> {
    match max_entries.and_then(NonZeroUsize::new) {
        Some(cap) => LruCache::new(cap),
        None => LruCache::unbounded(),
    }
}

impl<V> PersistentLru<V>
where
    V: Expiring + Clone + Serialize + DeserializeOwned,
{
    /// 永続化しないストア。`max_entries` が `None` または 0 なら上限なし。
    #[must_use]
    pub fn in_memory(label: &'static str, max_entries: Option<usize>) -> Self {
        Self {
            label,
            path: None,
            persist_interval: DEFAULT_PERSIST_INTERVAL,
            inner: Mutex::new(Inner {
                entries: new_entries(max_entries),
                pending: 0,
            }),
        }
    }

    /// ファイルから読み込む。壊れたファイルは空、期限切れは読み飛ばす。
    ///
    /// 上限を超える分は失効の早いものから捨てる。
    #[must_use]
    pub fn load(
        label: &'static str,
        path: impl Into<PathBuf>,
        max_entries: Option<usize>,
        now: i64,
    ) -> Self {
        let path = path.into();
        let raw: BTreeMap<String, V> = load_json(&path).unwrap_or_default();
        let stored = raw.len();

        let mut live: Vec<(String, V)> = raw
            .into_iter()
            .filter(|(_, value)| value.expires_at() > now)
            .collect();
        live.sort_by_key(|(_, value)| value.expires_at());
        let mut entries = new_entries(max_entries);
        for (key, value) in live {
            entries.put(key, value);
        }
        debug!(
            cache = label,
            path = %path.display(),
            stored,
            loaded = entries.len(),
            "loaded cache file"
        );

        Self {
            label,
            path: Some(path),
            persist_interval: DEFAULT_PERSIST_INTERVAL,
            inner: Mutex::new(Inner { entries, pending: 0 }),
        }
    }

    /// 書き出し間隔を変える。0 は 1 として扱う。
    #[must_use]
    pub fn with_persist_interval(mut self, interval: usize) -> Self {
        self.persist_interval = interval.max(1);
        self
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// 参照して最近使用に移す。期限切れは削除して `None`。
    pub fn get(&self, key: &str, now: i64) -> Option<V> {
        let mut inner = self.inner.lock();
        let expired = inner.entries.get(key)?.expires_at() <= now;
        if expired {
            inner.entries.pop(key);
            return None;
        }
        inner.entries.get(key).cloned()
    }

    /// 登録する。上限を超えたら最も長く使われていないものを捨てる。
    pub fn insert(&self, key: String, value: V) {
        let mut inner = self.inner.lock();
        inner.entries.put(key, value);
        inner.pending += 1;
        if inner.pending >= self.persist_interval {
            self.persist_locked(&mut inner);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 上限。上限なしなら `None`。
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        let cap = self.inner.lock().entries.cap().get();
        (cap != usize::MAX).then_some(cap)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.pending = 0;
    }

    /// 期限切れを捨ててからファイルへ保存する。失敗はログに残して握りつぶす。
    pub fn flush(&self, now: i64) {
        let mut inner = self.inner.lock();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, value)| value.expires_at() <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.entries.pop(key);
        }
        self.persist_locked(&mut inner);
    }

    fn persist_locked(&self, inner: &mut Inner<V>) {
        inner.pending = 0;
        let Some(path) = &self.path else {
            return;
        };
        let snapshot: BTreeMap<&String, &V> = inner.entries.iter().collect();
        if let Err(err) = save_json_atomic(path, &snapshot) {
            error!(cache = self.label, path = %path.display(), error = ?err, "failed to persist cache");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Stamp {
        value: u32,
        expires_at: i64,
    }

    impl Expiring for Stamp {
        fn expires_at(&self) -> i64 {
            self.expires_at
        }
    }

    fn stamp(value: u32, expires_at: i64) -> Stamp {
        Stamp { value, expires_at }
    }

    #[test]
    fn evicts_least_recently_used() {
        let store = PersistentLru::in_memory("test", Some(2));
        store.insert("a1".to_string(), stamp(1, 100));
        store.insert("b1".to_string(), stamp(2, 100));
        assert_eq!(store.get("a1", 0).map(|hit| hit.value), Some(1));
        store.insert("c1".to_string(), stamp(3, 100));

        assert_eq!(store.len(), 2);
        assert!(store.get("b1", 0).is_none());
        assert_eq!(store.capacity(), Some(2));
    }

    #[test]
    fn zero_or_missing_cap_is_unbounded() {
        let store: PersistentLru<Stamp> = PersistentLru::in_memory("test", Some(0));
        assert_eq!(store.capacity(), None);
        for i in 0..50 {
            store.insert(format!("k{i}"), stamp(i, 100));
        }
        assert_eq!(store.len(), 50);
    }

    #[test]
    fn expired_entry_is_removed_on_get() {
        let store = PersistentLru::in_memory("test", None);
        store.insert("a1".to_string(), stamp(1, 10));
        assert_eq!(store.get("a1", 10), None);
        assert!(store.is_empty());
    }

    #[test]
    fn persists_every_interval_without_flush() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        let store = PersistentLru::load("test", &path, None, 0).with_persist_interval(2);

        store.insert("a1".to_string(), stamp(1, 100));
        assert!(!path.exists());
        store.insert("b1".to_string(), stamp(2, 100));
        assert!(path.exists());

        let reloaded: PersistentLru<Stamp> = PersistentLru::load("test", &path, None, 0);
        assert_eq!(reloaded.get("b1", 0), Some(stamp(2, 100)));
    }

    #[test]
    fn load_and_flush_drop_expired_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        let store = PersistentLru::load("test", &path, None, 0);
        store.insert("old".to_string(), stamp(1, 5));
        store.insert("new".to_string(), stamp(2, 50));
        store.flush(10);
        assert_eq!(store.len(), 1);

        let raw: BTreeMap<String, Stamp> = load_json(&path).expect("persisted");
        assert_eq!(raw.keys().collect::<Vec<_>>(), vec!["new"]);

        let reloaded: PersistentLru<Stamp> = PersistentLru::load("test", &path, None, 60);
        assert!(reloaded.is_empty());
    }

    #[test]
    fn load_respects_cap() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        let store = PersistentLru::load("test", &path, None, 0);
        store.insert("a1".to_string(), stamp(1, 10));
        store.insert("b1".to_string(), stamp(2, 30));
        store.insert("c1".to_string(), stamp(3, 20));
        store.flush(0);

        let reloaded: PersistentLru<Stamp> = PersistentLru::load("test", &path, Some(2), 0);
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.get("a1", 0).is_none());
    }
}
