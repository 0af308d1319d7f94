//! 分類の手がかりにならない汎用語の集合。
use once_cell::sync::Lazy;
use rustc_hash::FxHashSet;

static COMMON_WORDS: Lazy<FxHashSet<&'static str>> = Lazy::new(|| {
    let mut words: FxHashSet<&'static str> = [
        // 英語の機能語
        "the", "a", "an", "and", "or", "but", "of", "in", "on", "at", "to", "for", "with", "by",
        "from", "as", "is", "are", "was", "were", "be", "been", "it", "its", "this", "that",
        "these", "those", "up", "out", "off", "over", "into", "onto", "not", "no", "yes",
        // プロンプトで頻出するが意味の薄い語
        "thing", "stuff", "some", "any", "one", "more", "much", "many", "other", "etc",
        // 日本語の助詞・汎用語
        "の", "と", "は", "が", "を", "に", "で", "も", "や", "な", "こと", "もの",
    ]
    .into_iter()
    .collect();

    // 1文字の英字・数字
    const SINGLE: &str = "abcdefghijklmnopqrstuvwxyz0123456789";
    for index in 0..SINGLE.len() {
        words.insert(&SINGLE[index..=index]);
    }
    words
});

/// 汎用語かどうかを判定する（前後空白除去＋小文字化した上で照合）。
///
/// 空文字も汎用語として扱う。
#[must_use]
pub fn is_common(token: &str) -> bool {
    let normalized = token.trim().to_lowercase();
    normalized.is_empty() || COMMON_WORDS.contains(normalized.as_str())
}

/// 汎用語の件数。
#[must_use]
pub fn common_word_count() -> usize {
    COMMON_WORDS.len()
}
