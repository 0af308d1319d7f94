//! カテゴリ分類用キーワードデータベース。
//!
//! 各カテゴリに対して、プロンプトで使われる英語（一部日本語）のキーワードを定義します。
//! 汎用語は読み込み時に取り除かれます。
use std::collections::HashMap;

use tracing::debug;

use super::common_words::is_common;

/// 既定のカテゴリとその優先度（小さいほど優先）。
pub const DEFAULT_CATEGORIES: &[(&str, u32)] = &[
    ("品質・画質", 1),
    ("人物・キャラクター", 2),
    ("ネガティブ", 3),
    ("表情・感情", 5),
    ("髪型・髪色", 6),
    ("服装・衣装", 7),
    ("ポーズ・動作", 8),
    ("背景・環境", 9),
    ("色彩・照明", 10),
    ("構図・カメラ", 11),
    ("スタイル・技法", 12),
];

/// 未登録カテゴリの優先度。
pub const UNKNOWN_PRIORITY: u32 = 999;

/// カテゴリ別キーワードマップ。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryKeywords {
    keywords: HashMap<String, Vec<String>>,
}

impl CategoryKeywords {
    /// 任意のマップから構築する。キーワードは正規化され、汎用語と重複は除かれる。
    #[must_use]
    pub fn from_map<C, K, I>(map: I) -> Self
    where
        C: Into<String>,
        K: AsRef<str>,
        I: IntoIterator<Item = (C, Vec<K>)>,
    {
        let mut keywords: HashMap<String, Vec<String>> = HashMap::new();
        for (category, list) in map {
            let category = category.into();
            let entry = keywords.entry(category.clone()).or_default();
            for keyword in list {
                let normalized = keyword.as_ref().trim().to_lowercase();
                if is_common(&normalized) {
                    debug!(%category, keyword = %normalized, "dropping common keyword");
                    continue;
                }
                if !entry.contains(&normalized) {
                    entry.push(normalized);
                }
            }
        }
        Self { keywords }
    }

    /// 既定のキーワードマップを構築する。
    #[must_use]
    #[allow(clippy::too_many_lines)]
    pub fn default_keywords() -> Self {
        Self::from_map([
            (
                "品質・画質",
                vec![
                    "masterpiece",
                    "best quality",
                    "high quality",
                    "ultra detailed",
                    "highly detailed",
                    "highres",
                    "absurdres",
                    "8k",
                    "4k",
                    "sharp focus",
                    "高画質",
                    "最高品質",
                ],
            ),
            (
                "人物・キャラクター",
                vec![
                    "1girl",
                    "1boy",
                    "2girls",
                    "girl",
                    "boy",
                    "woman",
                    "man",
                    "solo",
                    "child",
                    "elf",
                    "maid",
                    "少女",
                    "女性",
                    "男性",
                ],
            ),
            (
                "ネガティブ",
                vec![
                    "lowres",
                    "bad anatomy",
                    "bad hands",
                    "worst quality",
                    "low quality",
                    "blurry",
                    "jpeg artifacts",
                    "watermark",
                    "signature",
                    "extra fingers",
                    "missing fingers",
                    "deformed",
                    "低品質",
                ],
            ),
            (
                "表情・感情",
                vec![
                    "smile",
                    "smiling",
                    "grin",
                    "crying",
                    "tears",
                    "angry",
                    "blush",
                    "happy",
                    "sad",
                    "surprised",
                    "expressionless",
                    "open mouth",
                    "closed eyes",
                    "笑顔",
                    "泣き顔",
                ],
            ),
            (
                "髪型・髪色",
                vec![
                    "long hair",
                    "short hair",
                    "medium hair",
                    "hair",
                    "ponytail",
                    "twintails",
                    "braid",
                    "bob cut",
                    "bangs",
                    "ahoge",
                    "blonde hair",
                    "black hair",
                    "silver hair",
                    "blue hair",
                    "pink hair",
                    "hairstyle",
                    "ロングヘア",
                    "ショートヘア",
                    "ポニーテール",
                    "髪",
                ],
            ),
            (
                "服装・衣装",
                vec![
                    "dress",
                    "shirt",
                    "skirt",
                    "school uniform",
                    "serafuku",
                    "kimono",
                    "jacket",
                    "coat",
                    "hat",
                    "gloves",
                    "armor",
                    "swimsuit",
                    "hoodie",
                    "ribbon",
                    "制服",
                    "着物",
                ],
            ),
            (
                "ポーズ・動作",
                vec![
                    "standing",
                    "sitting",
                    "running",
                    "walking",
                    "jumping",
                    "lying",
                    "kneeling",
                    "arms up",
                    "looking at viewer",
                    "looking back",
                    "peace sign",
                    "pose",
                    "座る",
                    "立つ",
                ],
            ),
            (
                "背景・環境",
                vec![
                    "background",
                    "simple background",
                    "white background",
                    "outdoors",
                    "indoors",
                    "sky",
                    "forest",
                    "city",
                    "cityscape",
                    "beach",
                    "night",
                    "sunset",
                    "room",
                    "street",
                    "scenery",
                    "背景",
                    "風景",
                ],
            ),
            (
                "色彩・照明",
                vec![
                    "lighting",
                    "light",
                    "shadow",
                    "backlighting",
                    "rim light",
                    "soft lighting",
                    "cinematic lighting",
                    "colorful",
                    "monochrome",
                    "vivid colors",
                    "pastel colors",
                    "glow",
                    "blue",
                    "red",
                    "golden",
                    "照明",
                    "逆光",
                ],
            ),
            (
                "構図・カメラ",
                vec![
                    "close-up",
                    "full body",
                    "upper body",
                    "portrait",
                    "from above",
                    "from below",
                    "from side",
                    "wide shot",
                    "cowboy shot",
                    "depth of field",
                    "bokeh",
                    "dutch angle",
                    "構図",
                ],
            ),
            (
                "スタイル・技法",
                vec![
                    "anime",
                    "anime style",
                    "realistic",
                    "photorealistic",
                    "oil painting",
                    "watercolor",
                    "sketch",
                    "line art",
                    "illustration",
                    "digital art",
                    "cel shading",
                    "3d render",
                    "pixel art",
                    "水彩",
                    "油絵",
                ],
            ),
        ])
    }

    /// カテゴリのキーワード一覧。
    #[must_use]
    pub fn get(&self, category: &str) -> Option<&[String]> {
        self.keywords.get(category).map(Vec::as_slice)
    }

    /// カテゴリ名の一覧（名前順）。
    #[must_use]
    pub fn categories(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.keywords.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// (カテゴリ, キーワード一覧) を走査する。
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.keywords
            .iter()
            .map(|(category, list)| (category.as_str(), list.as_slice()))
    }

    /// 指定キーワードを含むカテゴリ（名前順）。
    #[must_use]
    pub fn categories_containing(&self, keyword: &str) -> Vec<&str> {
        let needle = keyword.trim().to_lowercase();
        let mut found: Vec<&str> = self
            .keywords
            .iter()
            .filter(|(_, list)| list.iter().any(|k| *k == needle))
            .map(|(category, _)| category.as_str())
            .collect();
        found.sort_unstable();
        found
    }

    /// 全キーワードの和集合（重複なし、名前順）。
    #[must_use]
    pub fn universe(&self) -> Vec<String> {
        let mut all: Vec<String> = self.keywords.values().flatten().cloned().collect();
        all.sort_unstable();
        all.dedup();
        all
    }

    /// キーワードを追加する。汎用語や重複は無視し、追加されたかを返す。
    pub fn insert(&mut self, category: &str, keyword: &str) -> bool {
        let normalized = keyword.trim().to_lowercase();
        if is_common(&normalized) {
            return false;
        }
        let entry = self.keywords.entry(category.to_string()).or_default();
        if entry.contains(&normalized) {
            return false;
        }
        entry.push(normalized);
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }
}

/// カテゴリの優先度表。小さいほど優先。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryPriorities {
    priorities: HashMap<String, u32>,
}

impl Default for CategoryPriorities {
    fn default() -> Self {
        Self::from_pairs(DEFAULT_CATEGORIES.iter().copied())
    }
}

impl CategoryPriorities {
    #[must_use]
    pub fn from_pairs<C, I>(pairs: I) -> Self
    where
        C: Into<String>,
        I: IntoIterator<Item = (C, u32)>,
    {
        Self {
            priorities: pairs
                .into_iter()
                .map(|(category, priority)| (category.into(), priority))
                .collect(),
        }
    }

    /// 優先度を返す。未登録は [`UNKNOWN_PRIORITY`]。
    #[must_use]
    pub fn get(&self, category: &str) -> u32 {
        self.priorities
            .get(category)
            .copied()
            .unwrap_or(UNKNOWN_PRIORITY)
    }
}
