//! kubectl CLI wrapper

use async_trait::async_trait;
use davit_core::{Applier, ClusterError};
use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// `kubectl --context <ctx> apply -f <file>` でマニフェストを適用する
pub struct KubectlApplier {
    command: String,
    context: String,
}

impl KubectlApplier {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            command: "kubectl".to_string(),
            context: context.into(),
        }
    }

    /// kubectl 以外の実行ファイルを使う（テスト・ラッパースクリプト用）
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    pub fn args(&self, manifest: &Path) -> Vec<String> {
        vec![
            "--context".to_string(),
            self.context.clone(),
            "apply".to_string(),
            "-f".to_string(),
            manifest.display().to_string(),
        ]
    }
}

#[async_trait]
impl Applier for KubectlApplier {
    async fn apply(&self, manifest: &Path) -> Result<(), ClusterError> {
        let args = self.args(manifest);
        let mut cmd = Command::new(&self.command);
        cmd.args(&args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // 中断時に future ごと破棄されたらプロセスも止める
        cmd.kill_on_drop(true);

        tracing::debug!("Running: {} {}", self.command, args.join(" "));

        let output = cmd.output().await.map_err(|e| ClusterError::CommandSpawn {
            command: self.command.clone(),
            message: match e.kind() {
                ErrorKind::NotFound => "コマンドが見つかりません".to_string(),
                _ => e.to_string(),
            },
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ClusterError::ApplyFailed {
                status: output.status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        tracing::info!(
            stdout = %String::from_utf8_lossy(&output.stdout).trim(),
            "kubectl apply succeeded"
        );
        Ok(())
    }
}
