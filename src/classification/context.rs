//! タグ単体の文脈解析と、共起タグによるブースト計算。
use serde::{Deserialize, Serialize};

use super::common_words::is_common;
use super::scorer::score;
use super::synonyms;

const NEGATIONS: &[&str] = &["no", "not", "without", "none", "negative", "anti"];
const MODIFIERS: &[&str] = &["very", "extremely", "slightly", "somewhat", "quite", "rather"];

const COLORS: &[&str] = &[
    "red", "blue", "green", "yellow", "orange", "purple", "pink", "black", "white", "gray",
    "grey", "brown", "silver", "golden", "gold", "blonde", "aqua", "cyan", "teal",
    "赤", "青", "緑", "黄", "紫", "桃", "黒", "白", "銀", "金",
];

const STYLES: &[&str] = &[
    "anime", "realistic", "photorealistic", "cartoon", "watercolor", "oil painting", "sketch",
    "pixel art", "3d", "chibi", "manga", "impressionist", "cyberpunk", "fantasy", "水彩", "油絵",
];

/// タグ単体の解析結果。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagContext {
    pub has_negation: bool,
    pub has_modifier: bool,
    pub colors: Vec<String>,
    pub styles: Vec<String>,
    pub synonyms: Vec<String>,
}

/// カテゴリ間の共起ブースト規則。
///
/// タグが一方の例示語に一致し、共起タグのいずれかがもう一方の例示語に一致すると
/// タグ側のカテゴリに `boost` を加算する。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextBoostRule {
    pub categories: (String, String),
    pub boost: u32,
    pub examples: (Vec<String>, Vec<String>),
}

impl ContextBoostRule {
    #[must_use]
    pub fn new(
        first: impl Into<String>,
        second: impl Into<String>,
        boost: u32,
        first_examples: &[&str],
        second_examples: &[&str],
    ) -> Self {
        let owned = |list: &[&str]| list.iter().map(|s| s.to_lowercase()).collect::<Vec<_>>();
        Self {
            categories: (first.into(), second.into()),
            boost,
            examples: (owned(first_examples), owned(second_examples)),
        }
    }

    /// この規則がタグのカテゴリに加算する値。
    fn boost_for(&self, tag: &str, category: &str, peers: &[String]) -> u32 {
        let (first, second) = &self.categories;
        let (first_examples, second_examples) = &self.examples;

        let sides = [
            (first, first_examples.as_slice(), second_examples.as_slice()),
            (second, second_examples.as_slice(), first_examples.as_slice()),
        ];
        for (side_category, own_examples, other_examples) in sides {
            if side_category != category || !matches_any(tag, own_examples) {
                continue;
            }
            if peers.iter().any(|peer| matches_any(peer, other_examples)) {
                return self.boost;
            }
        }
        0
    }
}

fn matches_any(tag: &str, examples: &[String]) -> bool {
    examples.iter().any(|example| score(tag, example) > 0)
}

fn contains_word(words: &[&str], lowered: &str, vocabulary: &[&str]) -> Vec<String> {
    vocabulary
        .iter()
        .copied()
        .filter(|entry| {
            if entry.contains(' ') || !entry.is_ascii() {
                lowered.contains(*entry)
            } else {
                words.contains(entry)
            }
        })
        .map(str::to_string)
        .collect()
}

/// 文脈解析器。
#[derive(Debug, Clone)]
pub struct ContextAnalyzer {
    rules: Vec<ContextBoostRule>,
}

impl Default for ContextAnalyzer {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl ContextAnalyzer {
    #[must_use]
    pub fn new(rules: Vec<ContextBoostRule>) -> Self {
        Self { rules }
    }

    #[must_use]
    pub fn rules(&self) -> &[ContextBoostRule] {
        &self.rules
    }

    /// タグを解析する。汎用語は空の結果になる。
    #[must_use]
    pub fn analyze(&self, tag: &str) -> TagContext {
        if is_common(tag) {
            return TagContext::default();
        }
        let lowered = tag.trim().to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| c.is_whitespace() || c == '_' || c == '-')
            .filter(|w| !w.is_empty())
            .collect();

        TagContext {
            has_negation: words.iter().any(|w| NEGATIONS.contains(w)),
            has_modifier: words.iter().any(|w| MODIFIERS.contains(w)),
            colors: contains_word(&words, &lowered, COLORS),
            styles: contains_word(&words, &lowered, STYLES),
            synonyms: synonyms::expand(&lowered),
        }
    }

    /// 共起タグによるブースト合計。汎用語タグは 0。
    #[must_use]
    pub fn context_boost(&self, tag: &str, category: &str, peers: &[String]) -> u32 {
        if peers.is_empty() || is_common(tag) {
            return 0;
        }
        self.rules
            .iter()
            .map(|rule| rule.boost_for(tag, category, peers))
            .sum()
    }
}

/// 既定の共起ブースト規則。
#[must_use]
pub fn default_rules() -> Vec<ContextBoostRule> {
    let hair = ["hair", "ponytail", "twintails", "braid", "bangs", "bob cut", "髪"];
    let colors = [
        "blue", "red", "green", "pink", "black", "white", "silver", "blonde", "golden", "purple",
        "brown", "colorful", "青", "赤", "金",
    ];
    let clothes = ["dress", "shirt", "skirt", "uniform", "kimono", "jacket", "hat", "coat"];
    let people = ["1girl", "1boy", "girl", "boy", "woman", "man", "solo"];
    let faces = ["smile", "crying", "blush", "angry", "happy", "sad", "expression"];
    let scenery = ["background", "outdoors", "sky", "night", "sunset", "city", "forest"];
    let lights = ["lighting", "light", "backlighting", "glow", "shadow", "sunlight"];
    let poses = ["standing", "sitting", "running", "lying", "pose", "arms up"];
    let framing = ["full body", "upper body", "close-up", "portrait", "cowboy shot"];

    vec![
        ContextBoostRule::new("髪型・髪色", "色彩・照明", 50, &hair, &colors),
        ContextBoostRule::new("服装・衣装", "色彩・照明", 30, &clothes, &colors),
        ContextBoostRule::new("人物・キャラクター", "表情・感情", 30, &people, &faces),
        ContextBoostRule::new("背景・環境", "色彩・照明", 20, &scenery, &lights),
        ContextBoostRule::new("ポーズ・動作", "構図・カメラ", 20, &poses, &framing),
    ]
}
