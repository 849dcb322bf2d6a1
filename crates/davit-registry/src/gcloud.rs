//! gcloud CLI wrapper

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use davit_core::{ImageCandidate, RegistryClient, RegistryError, short_digest, sort_newest_first};
use serde::Deserialize;
use std::io::ErrorKind;
use std::process::Stdio;
use tokio::process::Command;

/// `gcloud artifacts docker images list --format=json` の1レコード
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    /// `<package>@sha256:...`
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub package: Option<String>,
    /// `sha256:...`
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub update_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub create_time: Option<DateTime<Utc>>,
}

/// gcloud のバージョンによって配列またはカンマ区切りの文字列になる
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(untagged)]
pub enum Tags {
    #[default]
    None,
    List(Vec<String>),
    Joined(String),
}

impl Tags {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Tags::None => Vec::new(),
            Tags::List(tags) => tags
                .iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            Tags::Joined(joined) => joined
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }
}

impl ImageRecord {
    fn digest(&self) -> String {
        match (&self.version, &self.name) {
            (Some(version), _) => short_digest(version),
            (None, Some(name)) => short_digest(name),
            (None, None) => "unknown".to_string(),
        }
    }
}

/// レコード列をデプロイ候補に変換する
///
/// タグごとに1件の候補を作り、タグのないレコードは捨てる。新しい順に並べる。
pub fn candidates_from_records(registry_path: &str, records: &[ImageRecord]) -> Vec<ImageCandidate> {
    let mut candidates: Vec<ImageCandidate> = records
        .iter()
        .filter_map(|record| {
            let updated_at = record.update_time.or(record.create_time)?;
            let digest = record.digest();
            Some(
                record
                    .tags
                    .to_vec()
                    .into_iter()
                    .map(move |tag| ImageCandidate {
                        registry_path: registry_path.to_string(),
                        tag,
                        digest: digest.clone(),
                        updated_at,
                    }),
            )
        })
        .flatten()
        .collect();
    sort_newest_first(&mut candidates);
    candidates
}

/// gcloud の JSON 出力を解析する
pub fn parse_output(registry_path: &str, stdout: &str) -> Result<Vec<ImageCandidate>, RegistryError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let records: Vec<ImageRecord> =
        serde_json::from_str(trimmed).map_err(|e| RegistryError::InvalidOutput(e.to_string()))?;
    Ok(candidates_from_records(registry_path, &records))
}

/// gcloud CLI wrapper
pub struct Gcloud {
    command: String,
}

impl Gcloud {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    async fn run_command(&self, args: &[&str]) -> Result<String, RegistryError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        tracing::debug!("Running: {} {}", self.command, args.join(" "));

        let output = cmd.output().await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => RegistryError::CommandNotFound {
                command: self.command.clone(),
            },
            _ => RegistryError::Io(e),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RegistryError::CommandFailed {
                command: self.command.clone(),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Default for Gcloud {
    fn default() -> Self {
        Self::new("gcloud")
    }
}

#[async_trait]
impl RegistryClient for Gcloud {
    async fn list_images(&self, registry_path: &str) -> Result<Vec<ImageCandidate>, RegistryError> {
        let stdout = self
            .run_command(&[
                "artifacts",
                "docker",
                "images",
                "list",
                registry_path,
                "--include-tags",
                "--format=json",
            ])
            .await?;
        let candidates = parse_output(registry_path, &stdout)?;
        tracing::info!(
            registry_path = %registry_path,
            count = candidates.len(),
            "Fetched image candidates"
        );
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OUTPUT: &str = r#"[
  {
    "createTime": "2024-04-30T09:00:00Z",
    "package": "europe-docker.pkg.dev/acme/apps/payment",
    "tags": "v1.4.0",
    "updateTime": "2024-04-30T09:00:00.123456Z",
    "version": "sha256:1111111aaaaaaaabbbbbbbb"
  },
  {
    "createTime": "2024-05-01T09:00:00Z",
    "package": "europe-docker.pkg.dev/acme/apps/payment",
    "tags": "v1.5.0, latest",
    "updateTime": "2024-05-01T09:00:00Z",
    "version": "sha256:2222222ccccccccdddddddd"
  },
  {
    "createTime": "2024-05-02T09:00:00Z",
    "package": "europe-docker.pkg.dev/acme/apps/payment",
    "tags": "",
    "updateTime": "2024-05-02T09:00:00Z",
    "version": "sha256:3333333eeeeeeeeffffffff"
  }
]"#;

    #[test]
    fn test_parse_joined_tags() {
        let candidates = parse_output("europe-docker.pkg.dev/acme/apps/payment", OUTPUT).unwrap();
        let tags: Vec<_> = candidates.iter().map(|c| c.tag.as_str()).collect();
        // 新しい順、同時刻はタグ名順。タグなしは含めない
        assert_eq!(tags, vec!["latest", "v1.5.0", "v1.4.0"]);
        assert_eq!(candidates[1].digest, "2222222");
        assert_eq!(
            candidates[2].image_reference(),
            "europe-docker.pkg.dev/acme/apps/payment:v1.4.0"
        );
    }

    #[test]
    fn test_parse_tag_array_and_name_digest() {
        let output = r#"[{
            "name": "gcr.io/acme/api@sha256:abcdef0123456789",
            "tags": ["v2", "stable"],
            "updateTime": "2024-01-01T00:00:00Z"
        }]"#;
        let candidates = parse_output("gcr.io/acme/api", output).unwrap();
        assert_eq!(candidates.len(), 2);
        assert!(candidates.iter().all(|c| c.digest == "abcdef0"));
    }

    #[test]
    fn test_parse_empty_and_invalid() {
        assert!(parse_output("gcr.io/acme/api", "").unwrap().is_empty());
        assert!(parse_output("gcr.io/acme/api", "[]").unwrap().is_empty());
        assert!(matches!(
            parse_output("gcr.io/acme/api", "ERROR: not json"),
            Err(RegistryError::InvalidOutput(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_command() {
        let gcloud = Gcloud::new("davit-test-no-such-gcloud");
        let err = gcloud.list_images("gcr.io/acme/api").await.unwrap_err();
        assert!(matches!(err, RegistryError::CommandNotFound { .. }));
    }
}
