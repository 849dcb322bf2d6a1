pub mod error;

pub use error::*;

use davit_core::{Environment, LogOptions, RolloutPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// カレントディレクトリで探す設定ファイル名
pub const LOCAL_CONFIG_FILE: &str = "davit.toml";

/// 設定ファイルのパスを直接指定する環境変数
pub const CONFIG_ENV_VAR: &str = "DAVIT_CONFIG";

/// davit の設定
///
/// プロセス開始時に一度だけ読み込み、以降は不変の値として各コンポーネントへ渡す。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub registry: RegistrySettings,
    #[serde(default)]
    pub rollout: RolloutPolicy,
    #[serde(default)]
    pub logs: LogOptions,
    #[serde(default)]
    pub environments: Vec<EnvironmentEntry>,
    /// 読み込んだファイル（相対パスの基準）
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Defaults {
    /// false の場合はプロンプトを出さずに失敗する
    #[serde(default = "default_true")]
    pub interactive: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self { interactive: true }
    }
}

fn default_true() -> bool {
    true
}

/// 設定ファイル上の環境定義
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentEntry {
    pub name: String,
    #[serde(alias = "repo_root")]
    pub yaml_root_dir: String,
    #[serde(alias = "kubectl_context")]
    pub cluster_context: String,
    #[serde(default)]
    pub protected: bool,
}

/// イメージレジストリの設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// このいずれかを含むイメージをデプロイ対象とみなす
    pub patterns: Vec<String>,
    /// 一覧取得に使うコマンド
    pub command: String,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            patterns: vec!["gcr.io/".to_string(), "docker.pkg.dev/".to_string()],
            command: "gcloud".to_string(),
        }
    }
}

impl Settings {
    /// TOML 文字列から読み込んで検証する
    pub fn from_toml(content: &str, source: Option<&Path>) -> Result<Self> {
        let mut settings: Settings = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: source.map(Path::to_path_buf).unwrap_or_default(),
            message: e.to_string(),
        })?;
        settings.source = source.map(Path::to_path_buf);
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.environments.is_empty() {
            return Err(ConfigError::Invalid(
                "[[environments]] が1つも定義されていません".to_string(),
            ));
        }

        let mut names = BTreeSet::new();
        for env in &self.environments {
            if env.name.trim().is_empty() {
                return Err(ConfigError::Invalid("環境名が空です".to_string()));
            }
            if !names.insert(env.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "環境名 '{}' が重複しています",
                    env.name
                )));
            }
            if env.cluster_context.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "環境 '{}' の cluster_context が空です",
                    env.name
                )));
            }
            if env.yaml_root_dir.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "環境 '{}' の yaml_root_dir が空です",
                    env.name
                )));
            }
        }

        if self.registry.patterns.iter().all(|p| p.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "[registry] patterns が空です".to_string(),
            ));
        }
        if self.rollout.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "[rollout] timeout_secs は1以上にしてください".to_string(),
            ));
        }
        if self.logs.buffer_lines == 0 {
            return Err(ConfigError::Invalid(
                "[logs] buffer_lines は1以上にしてください".to_string(),
            ));
        }
        Ok(())
    }

    /// 実行時に使う環境の一覧（パスは展開済み）
    pub fn environments(&self) -> Vec<Environment> {
        let base = self.source.as_deref().and_then(Path::parent);
        self.environments
            .iter()
            .map(|entry| {
                Environment::new(
                    entry.name.clone(),
                    expand_path(&entry.yaml_root_dir, base),
                    entry.cluster_context.clone(),
                )
                .with_protected(entry.protected)
            })
            .collect()
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

/// `~` をホームディレクトリに展開し、相対パスは `base` を基準にする
pub fn expand_path(raw: &str, base: Option<&Path>) -> PathBuf {
    let expanded = match raw.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match dirs::home_dir() {
            Some(home) => home.join(rest.trim_start_matches('/')),
            None => PathBuf::from(raw),
        },
        _ => PathBuf::from(raw),
    };

    match base {
        Some(base) if expanded.is_relative() => base.join(expanded),
        _ => expanded,
    }
}

/// グローバル設定ファイルの場所 (`<config_dir>/davit/config.toml`)
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("davit").join("config.toml"))
}

/// 設定ファイルを探す
///
/// 以下の優先順位で検索:
/// 1. 環境変数 DAVIT_CONFIG (直接パス指定)
/// 2. カレントディレクトリの davit.toml
/// 3. <config_dir>/davit/config.toml
pub fn find_config_file() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        let path = PathBuf::from(path);
        debug!(path = %path.display(), "Using DAVIT_CONFIG");
        if path.is_file() {
            return Ok(path);
        }
        return Err(ConfigError::EnvPathMissing(path));
    }

    if let Ok(current_dir) = std::env::current_dir() {
        let local = current_dir.join(LOCAL_CONFIG_FILE);
        if local.is_file() {
            return Ok(local);
        }
    }

    let global = global_config_path();
    if let Some(global) = &global
        && global.is_file()
    {
        return Ok(global.clone());
    }

    Err(ConfigError::NotFound {
        global: global
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/davit/config.toml".to_string()),
    })
}

/// 指定したファイルから読み込む
pub fn load_from(path: &Path) -> Result<Settings> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let settings = Settings::from_toml(&content, Some(path))?;
    info!(
        path = %path.display(),
        environments = settings.environments.len(),
        "Loaded configuration"
    );
    Ok(settings)
}

/// 設定ファイルを探して読み込む
pub fn load() -> Result<Settings> {
    let path = find_config_file()?;
    load_from(&path)
}
