//! kubeconfig のコンテキストからクライアントを作る

use davit_core::ClusterError;
use kube::Client;
use kube::config::{KubeConfigOptions, Kubeconfig};

/// 指定したコンテキストの Kubernetes クライアントを作成
pub async fn connect(context: &str) -> Result<Client, ClusterError> {
    let options = KubeConfigOptions {
        context: Some(context.to_string()),
        ..Default::default()
    };

    let config = kube::Config::from_kubeconfig(&options)
        .await
        .map_err(|e| ClusterError::Client(format!("kubeconfig の読み込みに失敗しました ({}): {}", context, e)))?;

    tracing::debug!(context = %context, cluster_url = %config.cluster_url, "Connecting to cluster");
    Client::try_from(config).map_err(|e| ClusterError::Client(e.to_string()))
}

/// kubeconfig に定義されたコンテキスト名の一覧
pub fn available_contexts() -> Vec<String> {
    Kubeconfig::read()
        .map(|config| config.contexts.into_iter().map(|c| c.name).collect())
        .unwrap_or_default()
}
