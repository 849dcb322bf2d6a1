//! ロールアウト中の Pod の観測値とクラスタイベント

use crate::error::ClusterError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 旧 Pod (置き換えられる側) か新 Pod (新しいイメージ) か
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Old,
    New,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Old => write!(f, "old"),
            Side::New => write!(f, "new"),
        }
    }
}

/// ウォッチから届いた Pod 1つ分のスナップショット
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodObservation {
    pub name: String,
    pub side: Side,
    /// status.phase (Pending, Running, Succeeded, Failed, Unknown)
    pub phase: String,
    /// 対象コンテナの ready
    pub ready: bool,
    /// 対象コンテナの state.waiting.reason
    pub waiting_reason: Option<String>,
    /// 対象コンテナの state.terminated.reason (lastState を含む)
    pub terminated_reason: Option<String>,
    pub restarts: u32,
    /// metadata.deletionTimestamp が設定されている
    pub terminating: bool,
}

impl PodObservation {
    pub fn new(name: impl Into<String>, side: Side, phase: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            side,
            phase: phase.into(),
            ready: false,
            waiting_reason: None,
            terminated_reason: None,
            restarts: 0,
            terminating: false,
        }
    }

    pub fn ready(mut self, ready: bool) -> Self {
        self.ready = ready;
        self
    }

    pub fn waiting(mut self, reason: impl Into<String>) -> Self {
        self.waiting_reason = Some(reason.into());
        self
    }

    pub fn terminating(mut self) -> Self {
        self.terminating = true;
        self
    }

    /// 異常を示す理由（waiting → terminated → phase の順）
    pub fn reason(&self) -> &str {
        self.waiting_reason
            .as_deref()
            .or(self.terminated_reason.as_deref())
            .unwrap_or(&self.phase)
    }
}

/// ポリシーで分類した Pod の状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodState {
    Pending,
    Running,
    Ready,
    Terminating,
    Crashed,
    Gone,
}

impl fmt::Display for PodState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PodState::Pending => "Pending",
            PodState::Running => "Running",
            PodState::Ready => "Ready",
            PodState::Terminating => "Terminating",
            PodState::Crashed => "Crashed",
            PodState::Gone => "Gone",
        };
        write!(f, "{}", label)
    }
}

/// クラスタウォッチからコントローラへ渡されるイベント
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    /// Pod の追加・更新
    Pod(PodObservation),
    /// Pod が削除された
    PodGone { name: String, side: Side },
    /// 初回の一覧取得が完了した
    Synced,
    /// ウォッチストリームの異常
    Failed(ClusterError),
}
