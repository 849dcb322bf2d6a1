//! デプロイ対象サービス

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// YAML ルートから発見されたデプロイ対象
///
/// 1つの YAML ファイルと、その Pod テンプレート内の1つのコンテナに対応する。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// サービス名（通常はワークロードの metadata.name）
    pub name: String,
    /// 所属する環境名
    pub environment: String,
    /// YAML ファイルの絶対パス
    pub file_path: PathBuf,
    /// YAML ルートからの相対パス
    pub relative_path: PathBuf,
    /// Pod テンプレート内の対象コンテナ名
    pub container: String,
    /// ディスク上の現在のイメージ参照
    pub current_image: String,
    /// ワークロード名 (Deployment など)
    pub workload: String,
    /// metadata.namespace
    pub namespace: Option<String>,
    /// Pod セレクタ (spec.selector.matchLabels)
    pub selector: BTreeMap<String, String>,
}

impl Service {
    /// 同名サービスを区別するための修飾名 (`env:path#container`)
    pub fn qualified_name(&self) -> String {
        format!(
            "{}:{}#{}",
            self.environment,
            self.relative_path.display(),
            self.container
        )
    }

    /// `kubectl -l` 形式のラベルセレクタ
    pub fn label_selector(&self) -> String {
        if self.selector.is_empty() {
            return format!("app={}", self.workload);
        }
        self.selector
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn namespace_or_default(&self) -> &str {
        self.namespace.as_deref().unwrap_or("default")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Service {
        Service {
            name: "payment-service".to_string(),
            environment: "staging".to_string(),
            file_path: PathBuf::from("/repo/stg/payments/deployment.yaml"),
            relative_path: PathBuf::from("payments/deployment.yaml"),
            container: "app".to_string(),
            current_image: "gcr.io/acme/payment:v1".to_string(),
            workload: "payment-service".to_string(),
            namespace: Some("payments".to_string()),
            selector: BTreeMap::new(),
        }
    }

    #[test]
    fn test_qualified_name() {
        assert_eq!(
            sample().qualified_name(),
            "staging:payments/deployment.yaml#app"
        );
    }

    #[test]
    fn test_label_selector() {
        let mut svc = sample();
        assert_eq!(svc.label_selector(), "app=payment-service");

        svc.selector.insert("tier".to_string(), "backend".to_string());
        svc.selector.insert("app".to_string(), "payment".to_string());
        assert_eq!(svc.label_selector(), "app=payment,tier=backend");
    }
}
