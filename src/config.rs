use std::{
    env,
    net::SocketAddr,
    num::{NonZeroU64, NonZeroUsize},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::embedding::hash::{MAX_DIMENSION, MIN_DIMENSION};
use crate::embedding::models::{self, ModelSpec};
use crate::embedding::neural::DeviceOptions;

#[cfg(test)]
use once_cell::sync::Lazy;
#[cfg(test)]
pub(crate) static ENV_MUTEX: Lazy<std::sync::Mutex<()>> = Lazy::new(|| std::sync::Mutex::new(()));

/// 使用頻度データのファイル名。
pub const USAGE_FILE: &str = "tag_usage_patterns.json";
/// 埋め込みキャッシュのファイル名。
pub const EMBEDDING_CACHE_FILE: &str = "tag_embeddings_cache.json";
/// 類似度キャッシュのファイル名。
pub const SIMILARITY_CACHE_FILE: &str = "tag_similarity_cache.json";
/// カスタマイズのファイル名。
pub const CUSTOMIZATION_FILE: &str = "tag_customizations.json";
/// AI設定のファイル名。
pub const SETTINGS_FILE: &str = "ai_settings.json";
/// 有効期間（日）の上限。約100年。
pub const MAX_TTL_DAYS: u64 = 36_500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    http_bind: SocketAddr,
    data_dir: PathBuf,
    settings_path: PathBuf,
    prediction_cache_size: NonZeroUsize,
    usage_save_interval: NonZeroU64,
    embedding_ttl_days: u64,
    similarity_ttl_days: u64,
    embedding_cache_max: Option<NonZeroUsize>,
    similarity_cache_max: Option<NonZeroUsize>,
    cache_persist_interval: NonZeroUsize,
    local_ai_disabled: Option<bool>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {source}")]
    Invalid {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl Config {
    /// 環境変数から設定値を読み込み、検証する。
    ///
    /// すべての値に既定値があり、未設定でも起動できる。
    ///
    /// # Errors
    /// 数値・アドレス・真偽値のパースに失敗した場合は [`ConfigError`] を返す。
    pub fn from_env() -> Result<Self, ConfigError> {
        let http_bind = parse_socket_addr("TAG_CLASSIFIER_HTTP_BIND", "127.0.0.1:9310")?;
        let data_dir = PathBuf::from(
            env::var("TAG_CLASSIFIER_DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
        );
        let settings_path = env::var("TAG_CLASSIFIER_SETTINGS_PATH")
            .map_or_else(|_| data_dir.join(SETTINGS_FILE), PathBuf::from);

        let prediction_cache_size =
            parse_non_zero_usize("TAG_CLASSIFIER_PREDICTION_CACHE_SIZE", 1000)?;
        let usage_save_interval = parse_non_zero_u64("TAG_CLASSIFIER_USAGE_SAVE_INTERVAL", 10)?;

        // キャッシュ設定
        let embedding_ttl_days = parse_ttl_days("TAG_CLASSIFIER_EMBEDDING_TTL_DAYS", 30)?;
        let similarity_ttl_days = parse_ttl_days("TAG_CLASSIFIER_SIMILARITY_TTL_DAYS", 7)?;
        let embedding_cache_max =
            NonZeroUsize::new(parse_usize("TAG_CLASSIFIER_EMBEDDING_CACHE_MAX", 10_000)?);
        let similarity_cache_max =
            NonZeroUsize::new(parse_usize("TAG_CLASSIFIER_SIMILARITY_CACHE_MAX", 10_000)?);
        let cache_persist_interval =
            parse_non_zero_usize("TAG_CLASSIFIER_CACHE_PERSIST_INTERVAL", 32)?;

        let local_ai_disabled = match env::var("TAG_CLASSIFIER_LOCAL_AI_DISABLED") {
            Ok(_) => Some(parse_bool("TAG_CLASSIFIER_LOCAL_AI_DISABLED", false)?),
            Err(_) => None,
        };

        Ok(Self {
            http_bind,
            data_dir,
            settings_path,
            prediction_cache_size,
            usage_save_interval,
            embedding_ttl_days,
            similarity_ttl_days,
            embedding_cache_max,
            similarity_cache_max,
            cache_persist_interval,
            local_ai_disabled,
        })
    }

    /// データディレクトリを指定した既定設定。
    #[must_use]
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            http_bind: SocketAddr::from(([127, 0, 0, 1], 9310)),
            settings_path: data_dir.join(SETTINGS_FILE),
            data_dir,
            prediction_cache_size: NonZeroUsize::MIN.saturating_add(999),
            usage_save_interval: NonZeroU64::MIN.saturating_add(9),
            embedding_ttl_days: 30,
            similarity_ttl_days: 7,
            embedding_cache_max: NonZeroUsize::new(10_000),
            similarity_cache_max: NonZeroUsize::new(10_000),
            cache_persist_interval: NonZeroUsize::MIN.saturating_add(31),
            local_ai_disabled: None,
        }
    }

    /// `ai_settings.json` を読み込み、環境変数による上書きを適用する。
    ///
    /// # Errors
    /// ファイルが壊れている、または値が範囲外の場合。
    pub fn load_settings(&self) -> Result<AiSettings, ConfigError> {
        let mut settings = AiSettings::load(&self.settings_path)?;
        if let Some(disabled) = self.local_ai_disabled {
            settings.local_ai_disabled = disabled;
        }
        Ok(settings)
    }

    #[must_use]
    pub fn http_bind(&self) -> SocketAddr {
        self.http_bind
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    #[must_use]
    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    #[must_use]
    pub fn prediction_cache_size(&self) -> usize {
        self.prediction_cache_size.get()
    }

    #[must_use]
    pub fn usage_save_interval(&self) -> u64 {
        self.usage_save_interval.get()
    }

    #[must_use]
    pub fn embedding_ttl_days(&self) -> u64 {
        self.embedding_ttl_days
    }

    #[must_use]
    pub fn similarity_ttl_days(&self) -> u64 {
        self.similarity_ttl_days
    }

    /// 0 を指定した場合は上限なし。
    #[must_use]
    pub fn embedding_cache_max(&self) -> Option<usize> {
        self.embedding_cache_max.map(NonZeroUsize::get)
    }

    /// 0 を指定した場合は上限なし。
    #[must_use]
    pub fn similarity_cache_max(&self) -> Option<usize> {
        self.similarity_cache_max.map(NonZeroUsize::get)
    }

    /// 埋め込み・類似度キャッシュを何件登録するごとに書き出すか。
    #[must_use]
    pub fn cache_persist_interval(&self) -> usize {
        self.cache_persist_interval.get()
    }

    #[must_use]
    pub fn local_ai_disabled(&self) -> Option<bool> {
        self.local_ai_disabled
    }
}

/// `ai_settings.json` の内容。欠けている項目は既定値。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiSettings {
    /// ニューラル埋め込みを初期化しない
    pub local_ai_disabled: bool,
    /// ニューラルが使えてもハッシュ埋め込みを使う
    pub use_lightweight_embeddings: bool,
    pub force_cpu: bool,
    pub use_cpu_only_initialization: bool,
    /// エンコーダにデバイスを指定しない
    pub skip_model_device_assignment: bool,
    /// `predict` の既定しきい値
    pub confidence_threshold: f64,
    /// `multilingual` / `english` / `japanese` / `large`
    pub model_name: String,
    pub hash_dimension: usize,
    /// 読み込み中のモデルを予測時に待つ時間（ミリ秒）
    pub embedding_wait_ms: u64,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            local_ai_disabled: false,
            use_lightweight_embeddings: false,
            force_cpu: false,
            use_cpu_only_initialization: false,
            skip_model_device_assignment: false,
            confidence_threshold: 0.5,
            model_name: models::MULTILINGUAL.key.to_string(),
            hash_dimension: MAX_DIMENSION,
            embedding_wait_ms: 0,
        }
    }
}

impl AiSettings {
    /// ファイルから読み込む。存在しなければ既定値。
    ///
    /// # Errors
    /// 読み込み・パースに失敗した場合、または値が範囲外の場合。
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(error) => {
                return Err(ConfigError::Invalid {
                    name: "TAG_CLASSIFIER_SETTINGS_PATH",
                    source: anyhow::Error::new(error),
                });
            }
        };
        let settings: Self = serde_json::from_str(&raw).map_err(|error| ConfigError::Invalid {
            name: "ai_settings",
            source: anyhow::Error::new(error),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// 値の範囲を検証する。
    ///
    /// # Errors
    /// しきい値が [0, 1] 外、ハッシュ次元が [128, 384] 外、未知のモデル名の場合。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::Invalid {
                name: "confidence_threshold",
                source: anyhow::anyhow!("value must be between 0.0 and 1.0"),
            });
        }
        if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&self.hash_dimension) {
            return Err(ConfigError::Invalid {
                name: "hash_dimension",
                source: anyhow::anyhow!(
                    "value must be between {MIN_DIMENSION} and {MAX_DIMENSION}"
                ),
            });
        }
        self.model_spec().map(|_| ())
    }

    /// 設定されたモデル。
    ///
    /// # Errors
    /// 未知のモデル名の場合。
    pub fn model_spec(&self) -> Result<&'static ModelSpec, ConfigError> {
        models::resolve(&self.model_name).map_err(|error| ConfigError::Invalid {
            name: "model_name",
            source: anyhow::Error::new(error),
        })
    }

    /// ニューラル埋め込みを読み込むべきか。
    #[must_use]
    pub fn wants_neural(&self) -> bool {
        !self.local_ai_disabled && !self.use_lightweight_embeddings
    }

    #[must_use]
    pub fn device_options(&self) -> DeviceOptions {
        DeviceOptions {
            force_cpu: self.force_cpu || self.use_cpu_only_initialization,
            skip_device_assignment: self.skip_model_device_assignment,
        }
    }
}

fn parse_socket_addr(name: &'static str, default: &str) -> Result<SocketAddr, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());

    raw.parse().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_non_zero_usize(name: &'static str, default: usize) -> Result<NonZeroUsize, ConfigError> {
    let parsed = parse_usize(name, default)?;
    NonZeroUsize::new(parsed).ok_or_else(|| ConfigError::Invalid {
        name,
        source: anyhow::anyhow!("must be greater than zero"),
    })
}

fn parse_non_zero_u64(name: &'static str, default: u64) -> Result<NonZeroU64, ConfigError> {
    let parsed = parse_u64(name, default)?;
    NonZeroU64::new(parsed).ok_or_else(|| ConfigError::Invalid {
        name,
        source: anyhow::anyhow!("must be greater than zero"),
    })
}

fn parse_usize(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<usize>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<u64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_ttl_days(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let days = parse_u64(name, default)?;
    if days > MAX_TTL_DAYS {
        return Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("must be at most {MAX_TTL_DAYS} days, got {days}"),
        });
    }
    Ok(days)
}

fn parse_bool(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    match raw.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("invalid boolean value: {raw}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: &[&str] = &[
        "TAG_CLASSIFIER_HTTP_BIND",
        "TAG_CLASSIFIER_DATA_DIR",
        "TAG_CLASSIFIER_SETTINGS_PATH",
        "TAG_CLASSIFIER_PREDICTION_CACHE_SIZE",
        "TAG_CLASSIFIER_USAGE_SAVE_INTERVAL",
        "TAG_CLASSIFIER_EMBEDDING_TTL_DAYS",
        "TAG_CLASSIFIER_SIMILARITY_TTL_DAYS",
        "TAG_CLASSIFIER_EMBEDDING_CACHE_MAX",
        "TAG_CLASSIFIER_SIMILARITY_CACHE_MAX",
        "TAG_CLASSIFIER_CACHE_PERSIST_INTERVAL",
        "TAG_CLASSIFIER_LOCAL_AI_DISABLED",
    ];

    fn set_env(name: &str, value: &str) {
        // SAFETY: tests serialize on ENV_MUTEX and assign valid UTF-8 values.
        unsafe {
            env::set_var(name, value);
        }
    }

    fn reset_env() {
        for name in VARS {
            // SAFETY: tests serialize on ENV_MUTEX.
            unsafe {
                env::remove_var(name);
            }
        }
    }

    #[test]
    fn from_env_uses_defaults() {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();

        let config = Config::from_env().expect("config should load");

        assert_eq!(config.http_bind(), "127.0.0.1:9310".parse().expect("addr"));
        assert_eq!(config.data_dir(), Path::new("./data"));
        assert_eq!(config.settings_path(), Path::new("./data").join(SETTINGS_FILE));
        assert_eq!(config.prediction_cache_size(), 1000);
        assert_eq!(config.usage_save_interval(), 10);
        assert_eq!(config.embedding_ttl_days(), 30);
        assert_eq!(config.similarity_ttl_days(), 7);
        assert_eq!(config.embedding_cache_max(), Some(10_000));
        assert_eq!(config.similarity_cache_max(), Some(10_000));
        assert_eq!(config.cache_persist_interval(), 32);
        assert_eq!(config.local_ai_disabled(), None);
        assert_eq!(config, Config::with_data_dir("./data"));
    }

    #[test]
    fn from_env_respects_overrides() {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();
        set_env("TAG_CLASSIFIER_HTTP_BIND", "0.0.0.0:8080");
        set_env("TAG_CLASSIFIER_DATA_DIR", "/var/lib/tags");
        set_env("TAG_CLASSIFIER_PREDICTION_CACHE_SIZE", "2");
        set_env("TAG_CLASSIFIER_EMBEDDING_CACHE_MAX", "0");
        set_env("TAG_CLASSIFIER_LOCAL_AI_DISABLED", "yes");

        let config = Config::from_env().expect("config should load");
        reset_env();

        assert_eq!(config.http_bind().port(), 8080);
        assert_eq!(
            config.settings_path(),
            Path::new("/var/lib/tags").join(SETTINGS_FILE)
        );
        assert_eq!(config.prediction_cache_size(), 2);
        assert_eq!(config.embedding_cache_max(), None);
        assert_eq!(config.local_ai_disabled(), Some(true));
    }

    #[test]
    fn from_env_rejects_zero_cache_size() {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();
        set_env("TAG_CLASSIFIER_PREDICTION_CACHE_SIZE", "0");

        let error = Config::from_env().expect_err("zero capacity should fail");
        reset_env();

        assert!(matches!(
            error,
            ConfigError::Invalid {
                name: "TAG_CLASSIFIER_PREDICTION_CACHE_SIZE",
                ..
            }
        ));
    }

    #[test]
    fn from_env_rejects_oversized_ttl() {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();
        set_env("TAG_CLASSIFIER_EMBEDDING_TTL_DAYS", "106751991167301");

        let error = Config::from_env().expect_err("huge ttl should fail");
        reset_env();

        assert!(matches!(
            error,
            ConfigError::Invalid {
                name: "TAG_CLASSIFIER_EMBEDDING_TTL_DAYS",
                ..
            }
        ));
    }

    #[test]
    fn from_env_rejects_bad_bool() {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();
        set_env("TAG_CLASSIFIER_LOCAL_AI_DISABLED", "maybe");

        let error = Config::from_env().expect_err("bad bool should fail");
        reset_env();

        assert!(matches!(error, ConfigError::Invalid { .. }));
    }

    #[test]
    fn missing_settings_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = AiSettings::load(&dir.path().join(SETTINGS_FILE)).expect("defaults");
        assert_eq!(settings, AiSettings::default());
        assert!(settings.wants_neural());
    }

    #[test]
    fn partial_settings_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, r#"{"use_lightweight_embeddings": true, "force_cpu": true}"#)
            .expect("write");

        let settings = AiSettings::load(&path).expect("settings");
        assert!(!settings.wants_neural());
        assert!(settings.device_options().force_cpu);
        assert!((settings.confidence_threshold - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn corrupt_settings_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, "{").expect("write");
        assert!(AiSettings::load(&path).is_err());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let settings = AiSettings {
            hash_dimension: 64,
            ..AiSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid {
                name: "hash_dimension",
                ..
            })
        ));

        let settings = AiSettings {
            model_name: "huge".to_string(),
            ..AiSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn env_override_disables_local_ai() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = Config::with_data_dir(dir.path());
        config.local_ai_disabled = Some(true);
        let settings = config.load_settings().expect("settings");
        assert!(settings.local_ai_disabled);
        assert!(!settings.wants_neural());
    }
}
