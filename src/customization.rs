//! ユーザー定義のキーワードと規則。
//!
//! 規則は優先度（小さいほど先）と登録順で評価する。`category_override` は予測全体を
//! 打ち切り、`score_modification` は該当カテゴリのスコアに係数を掛ける。
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::classification::scorer::score;
use crate::classification::{InvalidTag, is_common, normalize_tag, validate_tag};
use crate::util::persist::{load_json, save_json_atomic};

/// カスタマイズ操作のエラー。
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CustomizationError {
    #[error("invalid keyword: {0}")]
    InvalidKeyword(#[from] InvalidTag),
    #[error("keyword {0:?} is a common word")]
    CommonKeyword(String),
    #[error("category must not be empty")]
    EmptyCategory,
    #[error("weight must be a positive finite number, got {0}")]
    InvalidWeight(f64),
    #[error("factor must be a non-negative finite number, got {0}")]
    InvalidFactor(f64),
    #[error("rule {0:?} has no condition")]
    EmptyCondition(String),
    #[error("rule name must not be empty")]
    EmptyRuleName,
}

/// カテゴリに追加するキーワード。スコアに `weight` を掛けて使う。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomKeyword {
    pub keyword: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

/// 規則の適用条件。指定された条件をすべて満たすと一致。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_contains: Option<String>,
}

impl RuleCondition {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tag.is_none() && self.tag_contains.is_none()
    }

    /// 正規化済みタグに一致するか。
    #[must_use]
    pub fn matches(&self, tag: &str) -> bool {
        if self.is_empty() {
            return false;
        }
        let exact = self
            .tag
            .as_deref()
            .is_none_or(|wanted| normalize_tag(wanted) == tag);
        let contains = self
            .tag_contains
            .as_deref()
            .is_none_or(|needle| tag.contains(&normalize_tag(needle)));
        exact && contains
    }
}

/// 規則の効果。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleAction {
    CategoryOverride { category: String },
    ScoreModification { category: String, factor: f64 },
}

/// ユーザー定義の規則。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomRule {
    pub name: String,
    pub condition: RuleCondition,
    pub action: RuleAction,
    #[serde(default)]
    pub priority: i32,
}

/// 永続化形式。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Customizations {
    #[serde(default)]
    pub keywords: BTreeMap<String, Vec<CustomKeyword>>,
    #[serde(default)]
    pub rules: Vec<CustomRule>,
}

/// カスタマイズの保存先。
#[derive(Debug, Default)]
pub struct CustomizationStore {
    path: Option<PathBuf>,
    data: Customizations,
}

impl CustomizationStore {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// ファイルから読み込む。壊れたファイルは空として扱う。
    #[must_use]
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut data: Customizations = load_json(&path).unwrap_or_default();
        data.rules.sort_by_key(|rule| rule.priority);
        debug!(
            path = %path.display(),
            keyword_categories = data.keywords.len(),
            rules = data.rules.len(),
            "loaded tag customizations"
        );
        Self {
            path: Some(path),
            data,
        }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn snapshot(&self) -> &Customizations {
        &self.data
    }

    /// 優先度順の規則。
    #[must_use]
    pub fn rules(&self) -> &[CustomRule] {
        &self.data.rules
    }

    #[must_use]
    pub fn keywords(&self, category: &str) -> &[CustomKeyword] {
        self.data
            .keywords
            .get(category)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// カスタムキーワードを持つカテゴリ。
    pub fn keyword_categories(&self) -> impl Iterator<Item = &str> {
        self.data.keywords.keys().map(String::as_str)
    }

    /// キーワードを追加する。既存なら重みを更新する。
    ///
    /// # Errors
    /// 汎用語・構造的に不正なキーワード、空カテゴリ、不正な重み。
    pub fn add_keyword(
        &mut self,
        category: &str,
        keyword: &str,
        weight: f64,
    ) -> Result<(), CustomizationError> {
        let category = category.trim();
        if category.is_empty() {
            return Err(CustomizationError::EmptyCategory);
        }
        if !weight.is_finite() || weight <= 0.0 {
            return Err(CustomizationError::InvalidWeight(weight));
        }
        let keyword = validate_tag(keyword)?;
        if is_common(&keyword) {
            return Err(CustomizationError::CommonKeyword(keyword));
        }

        let entries = self.data.keywords.entry(category.to_string()).or_default();
        match entries.iter_mut().find(|entry| entry.keyword == keyword) {
            Some(entry) => entry.weight = weight,
            None => entries.push(CustomKeyword { keyword, weight }),
        }
        info!(category, "custom keyword added");
        Ok(())
    }

    /// キーワードを削除する。削除できたら `true`。
    pub fn remove_keyword(&mut self, category: &str, keyword: &str) -> bool {
        let keyword = normalize_tag(keyword);
        let Some(entries) = self.data.keywords.get_mut(category.trim()) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.keyword != keyword);
        let removed = entries.len() < before;
        if entries.is_empty() {
            self.data.keywords.remove(category.trim());
        }
        removed
    }

    /// 規則を追加する。同名の規則は置き換える。
    ///
    /// # Errors
    /// 名前や条件が空、係数が不正な場合。
    pub fn add_rule(&mut self, rule: CustomRule) -> Result<(), CustomizationError> {
        if rule.name.trim().is_empty() {
            return Err(CustomizationError::EmptyRuleName);
        }
        if rule.condition.is_empty() {
            return Err(CustomizationError::EmptyCondition(rule.name));
        }
        match &rule.action {
            RuleAction::CategoryOverride { category }
            | RuleAction::ScoreModification { category, .. }
                if category.trim().is_empty() =>
            {
                return Err(CustomizationError::EmptyCategory);
            }
            RuleAction::ScoreModification { factor, .. } if !factor.is_finite() || *factor < 0.0 => {
                return Err(CustomizationError::InvalidFactor(*factor));
            }
            _ => {}
        }

        self.data.rules.retain(|existing| existing.name != rule.name);
        info!(rule = %rule.name, priority = rule.priority, "custom rule added");
        self.data.rules.push(rule);
        self.data.rules.sort_by_key(|rule| rule.priority);
        Ok(())
    }

    /// 規則を削除する。削除できたら `true`。
    pub fn remove_rule(&mut self, name: &str) -> bool {
        let before = self.data.rules.len();
        self.data.rules.retain(|rule| rule.name != name);
        self.data.rules.len() < before
    }

    /// 最初に一致したカテゴリ上書き規則。タグ本体に加えて同義語も照合する。
    #[must_use]
    pub fn override_for(&self, tag: &str, synonyms: &[String]) -> Option<(&CustomRule, &str)> {
        self.data.rules.iter().find_map(|rule| {
            let RuleAction::CategoryOverride { category } = &rule.action else {
                return None;
            };
            let hit = rule.condition.matches(tag)
                || synonyms.iter().any(|synonym| rule.condition.matches(synonym));
            hit.then_some((rule, category.as_str()))
        })
    }

    /// 一致したスコア修正規則の係数の積。一致がなければ `None`。
    #[must_use]
    pub fn score_factor(&self, tag: &str, category: &str) -> Option<f64> {
        self.data
            .rules
            .iter()
            .filter_map(|rule| match &rule.action {
                RuleAction::ScoreModification {
                    category: target,
                    factor,
                } if target == category && rule.condition.matches(tag) => Some(*factor),
                _ => None,
            })
            .reduce(|acc, factor| acc * factor)
    }

    /// カテゴリのカスタムキーワードによる最大スコア（重み込み）。
    #[must_use]
    pub fn keyword_score(&self, tag: &str, category: &str) -> f64 {
        self.keywords(category)
            .iter()
            .map(|entry| f64::from(score(tag, &entry.keyword)) * entry.weight)
            .fold(0.0, f64::max)
    }

    /// カスタムキーワードとしてこの語を含むか。
    #[must_use]
    pub fn contains_keyword(&self, category: &str, keyword: &str) -> bool {
        self.keywords(category)
            .iter()
            .any(|entry| entry.keyword == keyword)
    }

    /// ファイルへ保存する。
    ///
    /// # Errors
    /// 書き込みに失敗した場合。
    pub fn save(&self) -> Result<()> {
        match &self.path {
            Some(path) => save_json_atomic(path, &self.data),
            None => Ok(()),
        }
    }
}
