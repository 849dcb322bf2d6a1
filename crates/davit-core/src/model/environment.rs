//! デプロイ先環境

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// デプロイ先環境（staging, production など）
///
/// 設定ファイルから一度だけ読み込まれ、実行中は変更されない。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    /// 環境名
    pub name: String,
    /// Kubernetes マニフェスト (YAML) のルートディレクトリ
    pub yaml_root_dir: PathBuf,
    /// kubeconfig のコンテキスト名
    pub cluster_context: String,
    /// 保護フラグ。true の場合は環境名の入力による確認が必須
    #[serde(default)]
    pub protected: bool,
}

impl Environment {
    pub fn new(
        name: impl Into<String>,
        yaml_root_dir: impl Into<PathBuf>,
        cluster_context: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            yaml_root_dir: yaml_root_dir.into(),
            cluster_context: cluster_context.into(),
            protected: false,
        }
    }

    pub fn with_protected(mut self, protected: bool) -> Self {
        self.protected = protected;
        self
    }

    /// 保護環境の確認入力を検証する
    ///
    /// 前後の空白以外は環境名と完全一致（大文字小文字を区別）する必要がある。
    /// 保護されていない環境では常に true。
    pub fn accepts_confirmation(&self, typed: &str) -> bool {
        !self.protected || typed.trim_end_matches(['\r', '\n']).trim() == self.name
    }
}
