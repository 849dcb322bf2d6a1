use crate::resolver::Axis;
use std::path::PathBuf;
use thiserror::Error;

/// 終了コード
pub mod exit_code {
    /// 成功（dry-run を含む）
    pub const SUCCESS: i32 = 0;
    /// ユーザーによる中断
    pub const ABORTED: i32 = 1;
    /// デプロイ失敗（ローカル変更は復元済み）
    pub const FAILED: i32 = 2;
    /// 復元自体が失敗した。手動での復旧が必要
    pub const FATAL: i32 = 3;
}

#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("{axis} '{fragment}' に一致するものが見つかりません\n利用可能な{axis}: {available}")]
    NotFound {
        axis: Axis,
        fragment: String,
        available: String,
    },

    #[error(
        "{axis} '{candidate}' の確認が必要です\n\nヒント:\n  • 完全な名前を指定してください: --{flag} {candidate}",
        flag = .axis.flag()
    )]
    Unconfirmed { axis: Axis, candidate: String },

    #[error(
        "{axis} が一意に決まりません。候補: {candidates}\n\nヒント:\n  • 候補のいずれかを完全な名前で指定してください"
    )]
    Ambiguous { axis: Axis, candidates: String },

    #[error("タグ '{tag}' がレジストリ {registry_path} に見つかりません")]
    TagNotFound { tag: String, registry_path: String },

    #[error("レジストリ {registry_path} にデプロイ可能なタグ付きイメージがありません")]
    NoCandidates { registry_path: String },

    #[error(
        "デプロイするイメージが選択されていません\n\nヒント:\n  • 非対話モードでは --tag を指定してください"
    )]
    TagRequired,

    #[error("操作がキャンセルされました")]
    Declined,

    #[error(
        "保護された環境 '{environment}' へのデプロイには環境名の入力による確認が必要です\n\nヒント:\n  • 非対話モードでは --confirm-env {environment} を指定してください"
    )]
    ProtectedNotConfirmed { environment: String },
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error(
        "コマンド '{command}' が見つかりません\n\nヒント:\n  • {command} がインストールされ PATH に含まれているか確認してください"
    )]
    CommandNotFound { command: String },

    #[error("レジストリ一覧の取得に失敗しました ({command}): {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("レジストリの出力を解析できません: {0}")]
    InvalidOutput(String),

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    #[error("YAML パースエラー: {0}")]
    ParseFailure(String),

    #[error("コンテナ '{container}' が YAML 内に見つかりません")]
    TargetNotFound { container: String },

    #[error("コンテナ '{container}' が {count} 箇所に存在するため、対象を特定できません")]
    AmbiguousTarget { container: String, count: usize },

    #[error(
        "コンテナ '{container}' の image フィールドを書き換え可能な形で特定できません\n\nヒント:\n  • flow 形式（[...] / {{...}}）ではなくブロック形式で記述してください"
    )]
    ImageFieldNotLocated { container: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("apply に失敗しました (exit={status:?})\n{stderr}")]
    ApplyFailed { status: Option<i32>, stderr: String },

    #[error("コマンド '{command}' を実行できません: {message}")]
    CommandSpawn { command: String, message: String },

    #[error("Kubernetes クライアントの初期化に失敗しました: {0}")]
    Client(String),

    #[error("Pod の監視ストリームでエラーが発生しました: {0}")]
    WatchFailed(String),

    #[error("Pod の監視ストリームが予期せず終了しました")]
    WatchEnded,

    #[error("Pod '{pod}' のログストリームでエラーが発生しました: {message}")]
    LogStream { pod: String, message: String },

    #[error("新しい Pod '{pod}' が異常終了しました: {reason}")]
    PodCrashed { pod: String, reason: String },

    #[error(
        "ロールアウトが {secs} 秒以内に完了しませんでした\n\nヒント:\n  • [rollout] timeout_secs を増やしてみてください"
    )]
    Timeout { secs: u64 },
}

#[derive(Error, Debug)]
pub enum RevertError {
    #[error("ファイルのスナップショットを取得できません: {path}\n理由: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("パッチ済みファイルを書き込めません: {path}\n理由: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "ファイルの復元に失敗しました: {path}\n理由: {source}\n\n手動での復旧が必要です。{path} を以下の内容で上書きしてください:\n--- 期待される内容 ---\n{original}\n--- ここまで ---"
    )]
    Restore {
        path: PathBuf,
        original: String,
        #[source]
        source: std::io::Error,
    },
}

impl RevertError {
    /// ローカルの状態が最後の正常なコミットと食い違ったままになるか
    pub fn is_fatal(&self) -> bool {
        matches!(self, RevertError::Restore { .. })
    }
}

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Git リポジトリではありません: {0}")]
    NotARepository(PathBuf),

    #[error("git {step} に失敗しました: {message}")]
    StepFailed { step: String, message: String },

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

/// 1回の実行で発生しうるエラーの全体
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("設定エラー: {0}")]
    Config(String),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Revert(#[from] RevertError),

    #[error(transparent)]
    Audit(#[from] AuditError),
}

impl CoreError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CoreError::Resolution(_) => exit_code::ABORTED,
            CoreError::Revert(e) if e.is_fatal() => exit_code::FATAL,
            CoreError::Audit(_) => exit_code::SUCCESS,
            CoreError::Config(_)
            | CoreError::Registry(_)
            | CoreError::Patch(_)
            | CoreError::Cluster(_)
            | CoreError::Revert(_) => exit_code::FAILED,
        }
    }

    /// エラー分類名（致命的エラー表示用）
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Config(_) => "ConfigError",
            CoreError::Resolution(_) => "ResolutionError",
            CoreError::Registry(_) => "RegistryError",
            CoreError::Patch(_) => "PatchError",
            CoreError::Cluster(_) => "ClusterError",
            CoreError::Revert(_) => "RevertError",
            CoreError::Audit(_) => "AuditError",
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
