//! Pod の分類とロールアウトの判定ポリシー

use super::pod::{PodObservation, PodState};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// ロールアウトの成否を判定するポリシー
///
/// タイムアウトやフェーズの分類はクラスタや運用によって異なるため、
/// すべて設定ファイルの `[rollout]` から上書きできる。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutPolicy {
    /// 監視開始からの制限時間（秒）
    pub timeout_secs: u64,
    /// 準備完了とみなす status.phase
    pub ready_phases: Vec<String>,
    /// 対象コンテナの ready も要求するか
    pub require_ready: bool,
    /// 異常終了とみなす waiting / terminated の理由
    pub crash_reasons: Vec<String>,
    /// 異常終了とみなす status.phase
    pub failed_phases: Vec<String>,
    /// 成功に必要な新 Pod の最小数
    pub min_new_pods: usize,
    /// 再起動回数がこれを超えたら異常終了とみなす
    pub max_restarts: Option<u32>,
}

impl Default for RolloutPolicy {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            ready_phases: vec!["Running".to_string()],
            require_ready: true,
            crash_reasons: [
                "CrashLoopBackOff",
                "ImagePullBackOff",
                "ErrImagePull",
                "CreateContainerConfigError",
                "InvalidImageName",
                "Error",
                "OOMKilled",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            failed_phases: vec!["Failed".to_string()],
            min_new_pods: 1,
            max_restarts: None,
        }
    }
}

impl RolloutPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// 観測値を Pod の状態に分類する
    pub fn classify(&self, pod: &PodObservation) -> PodState {
        if pod.terminating {
            return PodState::Terminating;
        }

        let crashed_reason = [&pod.waiting_reason, &pod.terminated_reason]
            .into_iter()
            .flatten()
            .any(|reason| self.crash_reasons.iter().any(|r| r == reason));
        let too_many_restarts = self.max_restarts.is_some_and(|max| pod.restarts > max);
        if crashed_reason || too_many_restarts || self.failed_phases.contains(&pod.phase) {
            return PodState::Crashed;
        }

        if self.ready_phases.contains(&pod.phase) && (!self.require_ready || pod.ready) {
            return PodState::Ready;
        }
        if pod.phase == "Running" {
            return PodState::Running;
        }
        PodState::Pending
    }
}
