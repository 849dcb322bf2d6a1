//! 確定したデプロイ意図

use super::{Environment, ImageCandidate, Service};

/// 1回の実行で確定した (環境, サービス, イメージ) の組
///
/// 確定後は変更されず、どのタスクからも同期なしで参照できる。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentIntent {
    pub environment: Environment,
    pub service: Service,
    pub image: ImageCandidate,
    pub dry_run: bool,
}

impl DeploymentIntent {
    pub fn new_image_reference(&self) -> String {
        self.image.image_reference()
    }

    /// 監査コミットのメッセージ
    pub fn commit_message(&self) -> String {
        format!(
            "feat(deploy): update {} to {} in {}",
            self.service.name, self.image.tag, self.environment.name
        )
    }
}
