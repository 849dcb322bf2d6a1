use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "設定ファイルが見つかりません。以下の場所を確認してください:\n\
        - 環境変数 DAVIT_CONFIG\n\
        - カレントディレクトリ: davit.toml\n\
        - {global}\n\n\
        ヒント:\n  • [[environments]] を1つ以上定義した TOML ファイルを作成してください"
    )]
    NotFound { global: String },

    #[error("DAVIT_CONFIG で指定された設定ファイルが存在しません: {0}")]
    EnvPathMissing(PathBuf),

    #[error("設定ファイルを読み込めません: {path}\n理由: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("設定ファイルの解析に失敗しました: {path}\n{message}")]
    Parse { path: PathBuf, message: String },

    #[error("設定が不正です: {0}")]
    Invalid(String),
}

impl From<ConfigError> for davit_core::CoreError {
    fn from(e: ConfigError) -> Self {
        davit_core::CoreError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
