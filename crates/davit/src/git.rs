//! ロールアウト成功後の Git への記録

use async_trait::async_trait;
use davit_core::{AuditError, AuditFinalizer, DeploymentIntent};
use std::ffi::OsStr;
use std::path::Path;
use tokio::process::Command;

/// 書き換えたマニフェストを commit して push する
pub struct GitFinalizer {
    command: String,
}

impl GitFinalizer {
    pub fn new() -> Self {
        Self {
            command: "git".to_string(),
        }
    }

    async fn run<I, S>(&self, dir: &Path, step: &str, args: I) -> Result<String, AuditError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = Command::new(&self.command)
            .arg("-C")
            .arg(dir)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(AuditError::StepFailed {
                step: step.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Default for GitFinalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditFinalizer for GitFinalizer {
    #[tracing::instrument(skip(self, intent), fields(manifest = %manifest.display()))]
    async fn finalize(&self, intent: &DeploymentIntent, manifest: &Path) -> Result<(), AuditError> {
        let dir = manifest.parent().unwrap_or(Path::new("."));

        let toplevel = match self.run(dir, "rev-parse", ["rev-parse", "--show-toplevel"]).await {
            Ok(toplevel) => toplevel,
            Err(AuditError::StepFailed { .. }) => {
                return Err(AuditError::NotARepository(dir.to_path_buf()));
            }
            Err(e) => return Err(e),
        };
        tracing::debug!(toplevel = %toplevel, "Detected git repository");

        let message = intent.commit_message();
        self.run(dir, "add", [OsStr::new("add"), manifest.as_os_str()])
            .await?;
        self.run(
            dir,
            "commit",
            [
                OsStr::new("commit"),
                OsStr::new("-m"),
                OsStr::new(&message),
                OsStr::new("--"),
                manifest.as_os_str(),
            ],
        )
        .await?;
        self.run(dir, "push", ["push"]).await?;

        tracing::info!(message = %message, "Committed and pushed manifest change");
        Ok(())
    }
}
