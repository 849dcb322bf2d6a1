//! 外部コラボレーターの抽象
//!
//! レジストリ、クラスタ、Git などの外部プロセスはこれらのトレイトの
//! 実装として差し込まれる。コアはこの境界の先を知らない。

use crate::error::{AuditError, ClusterError, RegistryError};
use crate::model::{DeploymentIntent, ImageCandidate};
use crate::rollout::ClusterEvent;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::path::Path;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// ログ行のストリーム
pub type LogStream = BoxStream<'static, Result<String, ClusterError>>;

/// イメージレジストリの一覧取得
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// タグ付きイメージを任意の順序で返す（並べ替えは呼び出し側で行う）
    async fn list_images(&self, registry_path: &str) -> Result<Vec<ImageCandidate>, RegistryError>;
}

/// マニフェストの適用 (`kubectl apply -f`)
#[async_trait]
pub trait Applier: Send + Sync {
    async fn apply(&self, manifest: &Path) -> Result<(), ClusterError>;
}

/// Pod イベントの供給元
#[async_trait]
pub trait ClusterWatch: Send + Sync {
    /// `cancel` されるまでイベントを `events` に送り続ける
    ///
    /// ストリームが途中で切れた場合はエラーを返す。受信側が閉じた場合は
    /// `Ok(())` で終了してよい。
    async fn watch(
        &self,
        events: mpsc::Sender<ClusterEvent>,
        cancel: CancellationToken,
    ) -> Result<(), ClusterError>;
}

/// Pod のログストリーム
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn open(&self, pod: &str) -> Result<LogStream, ClusterError>;
}

/// ロールアウト成功後の記録 (git add / commit / push)
#[async_trait]
pub trait AuditFinalizer: Send + Sync {
    async fn finalize(&self, intent: &DeploymentIntent, manifest: &Path) -> Result<(), AuditError>;
}
