//! タグとキーワードの一致度スコア。
use std::fmt;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use rustc_hash::FxHashMap;

use super::common_words::is_common;

const REGEX_CACHE_LIMIT: usize = 4096;

static WORD_BOUNDARY_CACHE: Lazy<Mutex<FxHashMap<String, Option<Regex>>>> =
    Lazy::new(|| Mutex::new(FxHashMap::default()));

/// 一致の種類。先に評価されるものほど重い。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchKind {
    Exact,
    WordBoundary,
    Substring,
    Prefix,
    Suffix,
}

impl MatchKind {
    /// 一致種別ごとの重み。
    #[must_use]
    pub const fn weight(self) -> u32 {
        match self {
            Self::Exact => 100,
            Self::WordBoundary => 80,
            Self::Substring => 50,
            Self::Prefix => 30,
            Self::Suffix => 20,
        }
    }
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Exact => "exact",
            Self::WordBoundary => "word",
            Self::Substring => "substring",
            Self::Prefix => "prefix",
            Self::Suffix => "suffix",
        };
        f.write_str(label)
    }
}

/// タグとキーワードの一致種別を判定する。
///
/// どちらかが空または汎用語の場合は `None`。
#[must_use]
pub fn classify(tag: &str, keyword: &str) -> Option<MatchKind> {
    let tag = tag.trim().to_lowercase();
    let keyword = keyword.trim().to_lowercase();
    if is_common(&tag) || is_common(&keyword) {
        return None;
    }

    if tag == keyword {
        Some(MatchKind::Exact)
    } else if matches_word_boundary(&tag, &keyword) {
        Some(MatchKind::WordBoundary)
    } else if tag.contains(&keyword) {
        Some(MatchKind::Substring)
    } else if tag.starts_with(&keyword) {
        Some(MatchKind::Prefix)
    } else if tag.ends_with(&keyword) {
        Some(MatchKind::Suffix)
    } else {
        None
    }
}

/// タグとキーワードのスコア（0〜100）。種別をまたいだ加算はしない。
#[must_use]
pub fn score(tag: &str, keyword: &str) -> u32 {
    classify(tag, keyword).map_or(0, MatchKind::weight)
}

/// キーワード列に対する最大スコア。
#[must_use]
pub fn best_score<'a, I>(tag: &str, keywords: I) -> u32
where
    I: IntoIterator<Item = &'a String>,
{
    keywords
        .into_iter()
        .map(|keyword| score(tag, keyword))
        .max()
        .unwrap_or(0)
}

fn matches_word_boundary(tag: &str, keyword: &str) -> bool {
    let mut cache = WORD_BOUNDARY_CACHE.lock();
    if cache.len() >= REGEX_CACHE_LIMIT && !cache.contains_key(keyword) {
        cache.clear();
    }
    let pattern = cache
        .entry(keyword.to_string())
        .or_insert_with(|| Regex::new(&format!(r"\b{}\b", regex::escape(keyword))).ok());
    pattern.as_ref().is_some_and(|re| re.is_match(tag))
}
