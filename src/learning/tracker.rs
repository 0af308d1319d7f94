//! タグ使用頻度トラッカー。
//!
//! タグごとに強化回数、カテゴリ別の回数、共起タグ、最終使用時刻を記録し、
//! JSONファイルへ永続化する。テスト用マーカーを含むタグは一切記録しない。
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::Result;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::classification::{is_test_marker, normalize_tag};
use crate::util::persist::{load_json, save_json_atomic};
use crate::util::time::unix_now;

/// 既定の永続化間隔（同一タグの強化回数がこの倍数に達するたびに保存）。
pub const DEFAULT_SAVE_INTERVAL: u64 = 10;

/// タグ1件分の使用記録。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagUsage {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub categories: BTreeMap<String, u64>,
    #[serde(default)]
    pub last_used: i64,
    #[serde(default)]
    pub context_tags: BTreeMap<String, u64>,
}

impl TagUsage {
    /// 最も多く記録されたカテゴリ。同数の場合は名前順で先のもの。
    #[must_use]
    pub fn most_common_category(&self) -> Option<&str> {
        self.categories
            .iter()
            .filter(|(_, count)| **count > 0)
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(category, _)| category.as_str())
    }
}

/// 外部に返すタグ統計。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagStatistics {
    pub tag: String,
    pub frequency: u64,
    pub most_common_category: Option<String>,
    pub last_used: Option<i64>,
    pub categories: BTreeMap<String, u64>,
    pub context_tags: BTreeMap<String, u64>,
}

/// 使用頻度トラッカー。
#[derive(Debug)]
pub struct UsageTracker {
    path: Option<PathBuf>,
    save_interval: u64,
    data: Mutex<FxHashMap<String, TagUsage>>,
}

impl UsageTracker {
    /// 永続化しないトラッカー。
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            save_interval: DEFAULT_SAVE_INTERVAL,
            data: Mutex::new(FxHashMap::default()),
        }
    }

    /// ファイルから読み込む。存在しない・壊れている場合は空で開始する。
    ///
    /// テスト用マーカーを含むタグと共起タグは読み込み時に取り除き、キーを正規化する。
    #[must_use]
    pub fn load(path: impl Into<PathBuf>, save_interval: u64) -> Self {
        let path = path.into();
        let raw: BTreeMap<String, TagUsage> = load_json(&path).unwrap_or_default();
        let before = raw.len();
        let data = sanitize(raw);
        if data.len() < before {
            info!(
                path = %path.display(),
                dropped = before - data.len(),
                "dropped test-marker or duplicate tags from usage data"
            );
        }
        debug!(path = %path.display(), tags = data.len(), "loaded tag usage patterns");

        Self {
            path: Some(path),
            save_interval: save_interval.max(1),
            data: Mutex::new(data),
        }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// 使用を1回記録する。テスト用マーカーを含むタグは拒否し `false` を返す。
    ///
    /// 同一タグの回数が永続化間隔の倍数に達したときにファイルへ保存する。
    pub fn record(&self, tag: &str, category: Option<&str>, peers: &[String]) -> bool {
        let key = normalize_tag(tag);
        if key.is_empty() || is_test_marker(&key) {
            debug!(tag = %key, "refusing to record test-marker or empty tag");
            return false;
        }

        let mut data = self.data.lock();
        let usage = data.entry(key.clone()).or_default();
        usage.count += 1;
        usage.last_used = unix_now();
        if let Some(category) = category.map(str::trim).filter(|c| !c.is_empty()) {
            *usage.categories.entry(category.to_string()).or_insert(0) += 1;
        }
        for peer in peers {
            let peer_key = normalize_tag(peer);
            if peer_key.is_empty() || peer_key == key || is_test_marker(&peer_key) {
                continue;
            }
            *usage.context_tags.entry(peer_key).or_insert(0) += 1;
        }

        if usage.count % self.save_interval == 0 {
            self.persist_locked(&data);
        }
        true
    }

    /// 強化回数。
    #[must_use]
    pub fn frequency(&self, tag: &str) -> u64 {
        self.data
            .lock()
            .get(&normalize_tag(tag))
            .map_or(0, |usage| usage.count)
    }

    /// 最も多く記録されたカテゴリ。
    #[must_use]
    pub fn most_common_category(&self, tag: &str) -> Option<String> {
        self.data
            .lock()
            .get(&normalize_tag(tag))
            .and_then(TagUsage::most_common_category)
            .map(str::to_string)
    }

    /// 2つのタグの共起タグ集合のJaccard係数。どちらかが空なら 0.0。
    #[must_use]
    pub fn context_similarity(&self, tag1: &str, tag2: &str) -> f64 {
        let data = self.data.lock();
        let keys = |tag: &str| -> BTreeSet<String> {
            data.get(&normalize_tag(tag))
                .map(|usage| usage.context_tags.keys().cloned().collect())
                .unwrap_or_default()
        };
        let first = keys(tag1);
        let second = keys(tag2);
        if first.is_empty() || second.is_empty() {
            return 0.0;
        }
        let intersection = first.intersection(&second).count();
        let union = first.union(&second).count();
        #[allow(clippy::cast_precision_loss)]
        let similarity = intersection as f64 / union as f64;
        similarity
    }

    /// タグの統計情報。未記録のタグは頻度0の統計を返す。
    #[must_use]
    pub fn statistics(&self, tag: &str) -> TagStatistics {
        let key = normalize_tag(tag);
        let data = self.data.lock();
        match data.get(&key) {
            Some(usage) => TagStatistics {
                tag: key.clone(),
                frequency: usage.count,
                most_common_category: usage.most_common_category().map(str::to_string),
                last_used: Some(usage.last_used),
                categories: usage.categories.clone(),
                context_tags: usage.context_tags.clone(),
            },
            None => TagStatistics {
                tag: key,
                ..TagStatistics::default()
            },
        }
    }

    /// テスト用マーカーを含むタグを削除して保存する。削除件数を返す。
    pub fn cleanup_test_tags(&self) -> usize {
        let mut data = self.data.lock();
        let before = data.len();
        let cleaned = sanitize(std::mem::take(&mut *data));
        *data = cleaned;
        let removed = before - data.len();
        info!(removed, "cleaned up test-marker tags");
        self.persist_locked(&data);
        removed
    }

    /// 現在の状態を保存する。
    ///
    /// # Errors
    /// 書き込みに失敗した場合はエラーを返す。
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let data = self.data.lock();
        save_json_atomic(path, &ordered(&data))
    }

    /// 保存を試み、失敗はログに残して握りつぶす。
    pub fn flush(&self) {
        if let Err(error) = self.save() {
            error!(error = ?error, "failed to persist tag usage patterns");
        }
    }

    /// 永続化形式と同じ並びのスナップショット。
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, TagUsage> {
        ordered(&self.data.lock())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    fn persist_locked(&self, data: &FxHashMap<String, TagUsage>) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(error) = save_json_atomic(path, &ordered(data)) {
            error!(path = %path.display(), error = ?error, "failed to persist tag usage patterns");
        }
    }
}

fn ordered(data: &FxHashMap<String, TagUsage>) -> BTreeMap<String, TagUsage> {
    data.iter()
        .map(|(tag, usage)| (tag.clone(), usage.clone()))
        .collect()
}

/// 読み込んだ記録を整える。
///
/// キーは正規化し、衝突した記録は合算する。テスト用マーカーを含むタグと共起タグは捨てる。
/// `count` はカテゴリ別回数の合計を下回らないように引き上げる。
fn sanitize<I>(raw: I) -> FxHashMap<String, TagUsage>
where
    I: IntoIterator<Item = (String, TagUsage)>,
{
    let mut data: FxHashMap<String, TagUsage> = FxHashMap::default();
    for (tag, usage) in raw {
        let key = normalize_tag(&tag);
        if key.is_empty() || is_test_marker(&key) {
            continue;
        }
        let merged = data.entry(key.clone()).or_default();
        merge_into(merged, usage, &key);
    }
    for usage in data.values_mut() {
        let categorized = usage
            .categories
            .values()
            .fold(0_u64, |total, count| total.saturating_add(*count));
        usage.count = usage.count.max(categorized);
    }
    data
}

fn merge_into(target: &mut TagUsage, usage: TagUsage, key: &str) {
    target.count = target.count.saturating_add(usage.count);
    target.last_used = target.last_used.max(usage.last_used);
    for (category, count) in usage.categories {
        let category = category.trim();
        if category.is_empty() || count == 0 {
            continue;
        }
        let entry = target.categories.entry(category.to_string()).or_insert(0);
        *entry = entry.saturating_add(count);
    }
    for (peer, count) in usage.context_tags {
        let peer = normalize_tag(&peer);
        if peer.is_empty() || peer == key || is_test_marker(&peer) || count == 0 {
            continue;
        }
        let entry = target.context_tags.entry(peer).or_insert(0);
        *entry = entry.saturating_add(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peers(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn record_counts_categories_and_peers() {
        let tracker = UsageTracker::in_memory();
        assert!(tracker.record("Long Hair", Some("髪型・髪色"), &peers(&["Blue", "long hair"])));
        assert!(tracker.record("long hair", None, &[]));

        let stats = tracker.statistics("long hair");
        assert_eq!(stats.frequency, 2);
        assert_eq!(stats.categories.get("髪型・髪色"), Some(&1));
        assert_eq!(stats.context_tags.get("blue"), Some(&1));
        assert!(!stats.context_tags.contains_key("long hair"));
        let category_total: u64 = stats.categories.values().sum();
        assert!(category_total <= stats.frequency);
    }

    #[test]
    fn record_rejects_test_markers() {
        let tracker = UsageTracker::in_memory();
        assert!(!tracker.record("sample tag", Some("x"), &[]));
        assert!(!tracker.record("テストタグ", Some("x"), &[]));
        tracker.record("hat", Some("服装・衣装"), &peers(&["demo peer"]));

        assert_eq!(tracker.len(), 1);
        assert!(tracker.statistics("hat").context_tags.is_empty());
    }

    #[test]
    fn most_common_category_prefers_highest_count() {
        let tracker = UsageTracker::in_memory();
        tracker.record("glow", Some("色彩・照明"), &[]);
        tracker.record("glow", Some("スタイル・技法"), &[]);
        tracker.record("glow", Some("スタイル・技法"), &[]);

        assert_eq!(
            tracker.most_common_category("glow").as_deref(),
            Some("スタイル・技法")
        );
        assert_eq!(tracker.most_common_category("unknown"), None);
    }

    #[test]
    fn context_similarity_is_jaccard() {
        let tracker = UsageTracker::in_memory();
        tracker.record("a1", None, &peers(&["x1", "y1"]));
        tracker.record("b1", None, &peers(&["y1", "z1"]));
        tracker.record("c1", None, &[]);

        let similarity = tracker.context_similarity("a1", "b1");
        assert!((similarity - 1.0 / 3.0).abs() < 1e-9);
        assert!(tracker.context_similarity("a1", "c1").abs() < f64::EPSILON);
        assert!(tracker.context_similarity("a1", "missing").abs() < f64::EPSILON);
    }

    #[test]
    fn persists_every_interval() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tag_usage_patterns.json");
        let tracker = UsageTracker::load(&path, 3);

        tracker.record("ribbon", Some("服装・衣装"), &[]);
        tracker.record("ribbon", Some("服装・衣装"), &[]);
        assert!(!path.exists());

        tracker.record("ribbon", Some("服装・衣装"), &[]);
        assert!(path.exists());
        let reloaded = UsageTracker::load(&path, 3);
        assert_eq!(reloaded.frequency("ribbon"), 3);
    }

    #[test]
    fn load_purges_test_markers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tag_usage_patterns.json");
        std::fs::write(
            &path,
            r#"{
                "hat": {"count": 2, "categories": {"服装・衣装": 2}, "last_used": 10,
                        "context_tags": {"example peer": 1, "blue": 1}},
                "test tag": {"count": 5, "categories": {}, "last_used": 10, "context_tags": {}}
            }"#,
        )
        .expect("write");

        let tracker = UsageTracker::load(&path, 10);

        assert_eq!(tracker.len(), 1);
        let stats = tracker.statistics("hat");
        assert_eq!(stats.context_tags.len(), 1);
        assert!(stats.context_tags.contains_key("blue"));
    }

    #[test]
    fn load_normalizes_keys_and_repairs_counts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tag_usage_patterns.json");
        std::fs::write(
            &path,
            r#"{
                "Long Hair": {"count": 4, "categories": {"髪型・髪色": 9}, "last_used": 5,
                              "context_tags": {"Blue": 1, "LONG HAIR": 2}},
                " long hair ": {"count": 1, "categories": {"髪型・髪色": 1}, "last_used": 20,
                                "context_tags": {"blue": 2}}
            }"#,
        )
        .expect("write");

        let tracker = UsageTracker::load(&path, 10);

        assert_eq!(tracker.len(), 1);
        let stats = tracker.statistics("long hair");
        assert_eq!(stats.frequency, 10);
        assert_eq!(stats.categories.get("髪型・髪色"), Some(&10));
        assert_eq!(stats.context_tags.len(), 1);
        assert_eq!(stats.context_tags.get("blue"), Some(&3));
        assert_eq!(stats.last_used, Some(20));
        let keys: Vec<String> = tracker.snapshot().into_keys().collect();
        assert_eq!(keys, vec!["long hair".to_string()]);
    }

    #[test]
    fn cleanup_test_tags_persists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tag_usage_patterns.json");
        std::fs::write(
            &path,
            r#"{"hat": {"count": 1}, "my demo": {"count": 1}}"#,
        )
        .expect("write");
        let tracker = UsageTracker::load(&path, 10);

        assert_eq!(tracker.cleanup_test_tags(), 0);
        let persisted: BTreeMap<String, TagUsage> = load_json(&path).expect("persisted");
        assert_eq!(persisted.len(), 1);
    }

    #[test]
    fn statistics_for_unknown_tag_is_empty() {
        let stats = UsageTracker::in_memory().statistics("Nothing");
        assert_eq!(stats.tag, "nothing");
        assert_eq!(stats.frequency, 0);
        assert!(stats.last_used.is_none());
    }
}
