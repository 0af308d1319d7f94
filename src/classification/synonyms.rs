//! 静的な同義語辞書。値の並びは登録順を保つ。
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

const SYNONYM_TABLE: &[(&str, &[&str])] = &[
    ("hair", &["hairstyle", "hairdo", "locks", "tresses"]),
    ("blonde", &["blond", "golden hair", "yellow hair"]),
    ("blond", &["blonde", "golden hair"]),
    ("girl", &["1girl", "female", "woman"]),
    ("boy", &["1boy", "male", "man"]),
    ("smile", &["smiling", "grin", "happy"]),
    ("happy", &["smile", "joyful", "cheerful"]),
    ("sad", &["crying", "tears", "melancholy"]),
    ("angry", &["rage", "furious", "frown"]),
    ("dress", &["gown", "one-piece dress", "frock"]),
    ("uniform", &["school uniform", "serafuku", "outfit"]),
    ("shirt", &["blouse", "t-shirt", "top"]),
    ("light", &["lighting", "illumination", "glow"]),
    ("lighting", &["light", "illumination", "rim light"]),
    ("dark", &["shadow", "low key", "dim"]),
    ("bright", &["vivid", "brilliant", "high key"]),
    ("sky", &["clouds", "blue sky", "heaven"]),
    ("night", &["night sky", "midnight", "starry sky"]),
    ("city", &["cityscape", "urban", "street"]),
    ("forest", &["woods", "trees", "jungle"]),
    ("beach", &["seaside", "ocean", "shore"]),
    ("realistic", &["photorealistic", "realism", "lifelike"]),
    ("anime", &["anime style", "manga", "cel shading"]),
    ("painting", &["oil painting", "watercolor", "artwork"]),
    ("sketch", &["line art", "drawing", "lineart"]),
    ("masterpiece", &["best quality", "high quality", "ultra detailed"]),
    ("detailed", &["highly detailed", "intricate", "ultra detailed"]),
    ("blurry", &["out of focus", "low quality", "jpeg artifacts"]),
    ("closeup", &["close-up", "portrait", "face focus"]),
    ("standing", &["stand", "upright", "full body"]),
    ("sitting", &["seated", "sit", "kneeling"]),
    ("running", &["run", "sprinting", "jogging"]),
    ("髪", &["hair", "髪型", "ヘアスタイル"]),
    ("笑顔", &["smile", "smiling", "微笑み"]),
    ("背景", &["background", "scenery", "風景"]),
];

static SYNONYMS: Lazy<FxHashMap<&'static str, &'static [&'static str]>> =
    Lazy::new(|| SYNONYM_TABLE.iter().copied().collect());

/// タグ全体に対する同義語（登録順）。
#[must_use]
pub fn lookup(tag: &str) -> &'static [&'static str] {
    SYNONYMS
        .get(tag.trim().to_lowercase().as_str())
        .copied()
        .unwrap_or(&[])
}

/// タグ全体と、その構成語それぞれの同義語を重複なしで展開する。
///
/// タグ全体の同義語が先に並ぶ。タグ自身は含まない。
#[must_use]
pub fn expand(tag: &str) -> Vec<String> {
    let normalized = tag.trim().to_lowercase();
    let mut expanded: Vec<String> = Vec::new();
    let mut push = |candidate: &str| {
        if candidate != normalized && !expanded.iter().any(|existing| existing == candidate) {
            expanded.push(candidate.to_string());
        }
    };

    for synonym in lookup(&normalized) {
        push(synonym);
    }
    for word in normalized.split_whitespace() {
        if word == normalized {
            continue;
        }
        for synonym in lookup(word) {
            push(synonym);
        }
    }
    expanded
}

/// 辞書の見出し語数。
#[must_use]
pub fn entry_count() -> usize {
    SYNONYMS.len()
}
