//! 利用可能な文埋め込みモデルの定義。
//!
//! 商用利用可能なライセンスのモデルのみを読み込む。
use serde::Serialize;

use super::EmbeddingError;

/// 商用利用を許可するライセンス。
pub const PERMISSIVE_LICENSES: &[&str] = &["Apache-2.0", "MIT", "BSD-2-Clause", "BSD-3-Clause"];

/// 文埋め込みモデルの仕様。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelSpec {
    /// 設定で指定するキー
    pub key: &'static str,
    /// 配布元のモデル名
    pub name: &'static str,
    pub license: &'static str,
    pub dimension: usize,
    pub size_mb: u32,
    pub languages: &'static [&'static str],
}

impl ModelSpec {
    /// 商用利用可能なライセンスかどうか。
    #[must_use]
    pub fn is_permissive(&self) -> bool {
        PERMISSIVE_LICENSES.contains(&self.license)
    }

    /// 商用利用できないモデルを拒否する。
    ///
    /// # Errors
    /// ライセンスが許可リストにない場合は [`EmbeddingError::LicenseRejected`]。
    pub fn ensure_commercial_use(&self) -> Result<(), EmbeddingError> {
        if self.is_permissive() {
            Ok(())
        } else {
            Err(EmbeddingError::LicenseRejected {
                model: self.name.to_string(),
                license: self.license.to_string(),
            })
        }
    }

    #[must_use]
    pub fn supports_language(&self, code: &str) -> bool {
        self.languages.contains(&code)
    }
}

const MULTILINGUAL_LANGUAGES: &[&str] = &[
    "ar", "zh", "nl", "en", "fr", "de", "it", "ko", "pl", "pt", "ru", "es", "tr", "ja",
];

/// 既定の多言語モデル。
pub const MULTILINGUAL: ModelSpec = ModelSpec {
    key: "multilingual",
    name: "sentence-transformers/distiluse-base-multilingual-cased",
    license: "Apache-2.0",
    dimension: 512,
    size_mb: 539,
    languages: MULTILINGUAL_LANGUAGES,
};

pub const ENGLISH: ModelSpec = ModelSpec {
    key: "english",
    name: "sentence-transformers/all-MiniLM-L12-v2",
    license: "Apache-2.0",
    dimension: 384,
    size_mb: 134,
    languages: &["en"],
};

pub const JAPANESE: ModelSpec = ModelSpec {
    key: "japanese",
    name: "sentence-transformers/distiluse-base-multilingual-cased",
    license: "Apache-2.0",
    dimension: 512,
    size_mb: 539,
    languages: MULTILINGUAL_LANGUAGES,
};

pub const LARGE: ModelSpec = ModelSpec {
    key: "large",
    name: "sentence-transformers/all-distilroberta-v1",
    license: "Apache-2.0",
    dimension: 768,
    size_mb: 329,
    languages: &["en"],
};

/// 登録済みモデルの一覧。
pub const CATALOGUE: &[ModelSpec] = &[MULTILINGUAL, ENGLISH, JAPANESE, LARGE];

/// 設定キーからモデルを解決する。
///
/// # Errors
/// 未知のキーの場合は [`EmbeddingError::UnknownModel`]。
pub fn resolve(key: &str) -> Result<&'static ModelSpec, EmbeddingError> {
    let wanted = key.trim().to_lowercase();
    CATALOGUE
        .iter()
        .find(|spec| spec.key == wanted)
        .ok_or_else(|| EmbeddingError::UnknownModel(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_known_keys() {
        assert_eq!(resolve("multilingual").map(|s| s.dimension), Ok(512));
        assert_eq!(resolve(" English ").map(|s| s.dimension), Ok(384));
        assert!(resolve("japanese").is_ok_and(|s| s.supports_language("ja")));
        assert_eq!(resolve("large").map(|s| s.dimension), Ok(768));
    }

    #[test]
    fn resolve_unknown_key_fails() {
        assert!(matches!(resolve("gigantic"), Err(EmbeddingError::UnknownModel(_))));
    }

    #[test]
    fn catalogue_is_commercially_usable() {
        assert!(CATALOGUE.iter().all(ModelSpec::is_permissive));
    }

    #[test]
    fn non_permissive_license_is_rejected() {
        let spec = ModelSpec {
            license: "CC-BY-NC-4.0",
            ..ENGLISH
        };
        assert!(matches!(
            spec.ensure_commercial_use(),
            Err(EmbeddingError::LicenseRejected { .. })
        ));
    }
}
