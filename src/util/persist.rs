//! JSONファイルの読み書きユーティリティ。
//!
//! 書き込みは一時ファイルへ書いてから rename する全置換方式。
//! 読み込みはパース失敗を「キャッシュなし」として扱い、ファイルは削除しない。
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

/// JSONファイルを読み込む。存在しない・壊れている場合は `None`。
#[must_use]
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return None,
        Err(error) => {
            warn!(path = %path.display(), %error, "failed to read json file; treating as empty");
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(error) => {
            warn!(path = %path.display(), %error, "corrupt json file; treating as empty");
            None
        }
    }
}

/// JSONファイルを読み込み、失敗時は既定値を返す。
#[must_use]
pub fn load_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    load_json(path).unwrap_or_default()
}

/// 値をJSONとして原子的に書き出す。
///
/// 一時ファイル名にはPIDを含め、プロセス間の衝突を避ける。
///
/// # Errors
/// シリアライズ・書き込み・rename のいずれかに失敗した場合はエラーを返す。
pub fn save_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
    }

    let payload = serde_json::to_string(value).context("failed to serialize json payload")?;
    let tmp_path = path.with_extension(format!("tmp.{}", std::process::id()));
    fs::write(&tmp_path, payload.as_bytes())
        .with_context(|| format!("failed to write {}", tmp_path.display()))?;

    if let Err(error) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(error).with_context(|| format!("failed to replace {}", path.display()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("values.json");
        let mut values = BTreeMap::new();
        values.insert("blue".to_string(), 3_u32);

        save_json_atomic(&path, &values).expect("save");
        let loaded: BTreeMap<String, u32> = load_json(&path).expect("load");

        assert_eq!(loaded, values);
        assert!(!path.with_extension(format!("tmp.{}", std::process::id())).exists());
    }

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loaded: Option<BTreeMap<String, u32>> = load_json(&dir.path().join("absent.json"));
        assert!(loaded.is_none());
    }

    #[test]
    fn corrupt_file_is_treated_as_empty_and_kept() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.json");
        fs::write(&path, "{\"blue\": ").expect("write");

        let loaded: BTreeMap<String, u32> = load_json_or_default(&path);

        assert!(loaded.is_empty());
        assert!(path.exists(), "corrupt file must not be deleted");
    }
}
