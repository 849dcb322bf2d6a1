//! ロールアウトのフェーズ

use crate::error::ClusterError;
use std::fmt;
use thiserror::Error;

/// `Applying → Watching → {Succeeded | Failed | Aborted}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolloutPhase {
    Applying,
    Watching,
    Succeeded,
    Failed(ClusterError),
    Aborted,
}

impl RolloutPhase {
    fn rank(&self) -> u8 {
        match self {
            RolloutPhase::Applying => 0,
            RolloutPhase::Watching => 1,
            RolloutPhase::Succeeded | RolloutPhase::Failed(_) | RolloutPhase::Aborted => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }

    /// 逆戻りしない遷移かどうか
    pub fn can_transition_to(&self, next: &RolloutPhase) -> bool {
        next.rank() > self.rank()
    }

    pub fn name(&self) -> &'static str {
        match self {
            RolloutPhase::Applying => "Applying",
            RolloutPhase::Watching => "Watching",
            RolloutPhase::Succeeded => "Succeeded",
            RolloutPhase::Failed(_) => "Failed",
            RolloutPhase::Aborted => "Aborted",
        }
    }
}

impl fmt::Display for RolloutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("フェーズ {from} から {to} へは遷移できません")]
pub struct InvalidTransition {
    pub from: &'static str,
    pub to: &'static str,
}
