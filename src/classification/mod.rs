//! タグ分類の基礎部品（汎用語フィルタ、キーワードスコア、文脈解析、カテゴリ辞書）。
use thiserror::Error;

pub mod common_words;
pub mod context;
pub mod keywords;
pub mod scorer;
pub mod synonyms;

pub use common_words::is_common;
pub use context::{ContextAnalyzer, ContextBoostRule, TagContext};
pub use keywords::{CategoryKeywords, CategoryPriorities};
pub use scorer::{MatchKind, score};

/// どのカテゴリにも当てはまらない場合のラベル。
pub const UNCLASSIFIED: &str = "未分類";

/// タグの最大文字数。
pub const MAX_TAG_CHARS: usize = 64;

/// タグに使えない文字。
pub const FORBIDDEN_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// 学習対象から除外するテスト用マーカー。
pub const TEST_MARKERS: &[&str] = &[
    "test",
    "テスト",
    "サンプル",
    "sample",
    "デモ",
    "demo",
    "example",
    "例",
];

/// 入力タグの検証エラー。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidTag {
    #[error("tag is empty")]
    Empty,
    #[error("tag is too long: {0} chars (max {MAX_TAG_CHARS})")]
    TooLong(usize),
    #[error("tag contains forbidden character {0:?}")]
    ForbiddenChar(char),
}

/// 比較用にタグを正規化する（前後空白除去＋小文字化）。
#[must_use]
pub fn normalize_tag(tag: &str) -> String {
    tag.trim().to_lowercase()
}

/// タグを検証し、正規化済みの値を返す。
///
/// # Errors
/// 空文字、64文字超過、禁止文字を含む場合は [`InvalidTag`] を返す。
pub fn validate_tag(tag: &str) -> Result<String, InvalidTag> {
    let normalized = normalize_tag(tag);
    if normalized.is_empty() {
        return Err(InvalidTag::Empty);
    }
    let length = normalized.chars().count();
    if length > MAX_TAG_CHARS {
        return Err(InvalidTag::TooLong(length));
    }
    if let Some(ch) = normalized.chars().find(|ch| FORBIDDEN_CHARS.contains(ch)) {
        return Err(InvalidTag::ForbiddenChar(ch));
    }
    Ok(normalized)
}

/// テスト用マーカーを含むタグかどうか。
#[must_use]
pub fn is_test_marker(tag: &str) -> bool {
    let lowered = tag.to_lowercase();
    TEST_MARKERS.iter().any(|marker| lowered.contains(marker))
}
