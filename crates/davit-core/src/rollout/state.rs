//! ロールアウトの状態（コントローラだけが更新する）

use super::phase::{InvalidTransition, RolloutPhase};
use super::pod::{PodState, Side};
use super::policy::RolloutPolicy;
use crate::logmux::{LogEvent, LogLine};
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone)]
pub struct RolloutState {
    phase: RolloutPhase,
    history: Vec<RolloutPhase>,
    new_pods: BTreeMap<String, PodState>,
    old_pods: BTreeMap<String, PodState>,
    old_logs: VecDeque<LogLine>,
    new_logs: VecDeque<LogLine>,
    dropped: [u64; 2],
    history_lines: usize,
    synced: bool,
}

fn index(side: Side) -> usize {
    match side {
        Side::Old => 0,
        Side::New => 1,
    }
}

impl RolloutState {
    pub fn new(history_lines: usize) -> Self {
        Self {
            phase: RolloutPhase::Applying,
            history: vec![RolloutPhase::Applying],
            new_pods: BTreeMap::new(),
            old_pods: BTreeMap::new(),
            old_logs: VecDeque::new(),
            new_logs: VecDeque::new(),
            dropped: [0; 2],
            history_lines,
            synced: false,
        }
    }

    pub fn phase(&self) -> &RolloutPhase {
        &self.phase
    }

    /// これまでに通過したフェーズ（初期値の Applying を含む）
    pub fn phase_history(&self) -> &[RolloutPhase] {
        &self.history
    }

    pub fn pods(&self, side: Side) -> &BTreeMap<String, PodState> {
        match side {
            Side::Old => &self.old_pods,
            Side::New => &self.new_pods,
        }
    }

    fn pods_mut(&mut self, side: Side) -> &mut BTreeMap<String, PodState> {
        match side {
            Side::Old => &mut self.old_pods,
            Side::New => &mut self.new_pods,
        }
    }

    pub fn logs(&self, side: Side) -> &VecDeque<LogLine> {
        match side {
            Side::Old => &self.old_logs,
            Side::New => &self.new_logs,
        }
    }

    /// 消費が追いつかずに捨てられた行数の累計
    pub fn dropped_lines(&self, side: Side) -> u64 {
        self.dropped[index(side)]
    }

    pub(crate) fn mark_synced(&mut self) {
        self.synced = true;
    }

    pub(crate) fn transition(&mut self, next: RolloutPhase) -> Result<(), InvalidTransition> {
        if !self.phase.can_transition_to(&next) {
            return Err(InvalidTransition {
                from: self.phase.name(),
                to: next.name(),
            });
        }
        self.history.push(next.clone());
        self.phase = next;
        Ok(())
    }

    /// Pod の状態を記録する。変化があれば true
    pub(crate) fn update_pod(&mut self, side: Side, name: &str, state: PodState) -> bool {
        let previous = self.pods_mut(side).insert(name.to_string(), state);
        previous != Some(state)
    }

    /// Pod の削除を記録する
    ///
    /// 旧 Pod は Gone として残し、新 Pod は追跡対象から外す。
    pub(crate) fn remove_pod(&mut self, side: Side, name: &str) -> bool {
        match side {
            Side::Old => self.update_pod(side, name, PodState::Gone),
            Side::New => self.new_pods.remove(name).is_some(),
        }
    }

    pub(crate) fn record_log(&mut self, event: &LogEvent) {
        match event {
            LogEvent::Line(line) => {
                let limit = self.history_lines;
                let logs = match line.side {
                    Side::Old => &mut self.old_logs,
                    Side::New => &mut self.new_logs,
                };
                logs.push_back(line.clone());
                while logs.len() > limit {
                    logs.pop_front();
                }
            }
            LogEvent::Dropped { side, count } => self.dropped[index(*side)] += count,
            LogEvent::Ended { .. } => {}
        }
    }

    /// 新 Pod が全て Ready、旧 Pod が全て Gone になったか
    pub fn is_complete(&self, policy: &RolloutPolicy) -> bool {
        self.synced
            && self.new_pods.len() >= policy.min_new_pods
            && self.new_pods.values().all(|s| *s == PodState::Ready)
            && self.old_pods.values().all(|s| *s == PodState::Gone)
    }
}
