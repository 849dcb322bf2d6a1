//! ロールアウトコントローラ
//!
//! apply の結果とクラスタイベントから成否を判定し、終了時に
//! 監査（成功時）または復元（失敗・中断時）を必ず実行する。

use super::phase::RolloutPhase;
use super::pod::{ClusterEvent, PodState, Side};
use super::policy::RolloutPolicy;
use super::state::RolloutState;
use crate::error::{AuditError, ClusterError, RevertError, exit_code};
use crate::logmux::{LogEvent, LogMultiplexer, LogOptions};
use crate::model::DeploymentIntent;
use crate::provider::{Applier, AuditFinalizer, ClusterWatch, LogSource};
use crate::revert::RevertToken;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 64;

/// クラッシュ後に新 Pod のログを待つ時間
const CRASH_LOG_GRACE: Duration = Duration::from_secs(2);

/// 進行状況の通知先（UI など）
///
/// 呼び出しはコントローラのタスク上で同期的に行われるため、重い処理は避けること。
pub trait RolloutObserver: Send {
    fn phase_changed(&mut self, _phase: &RolloutPhase) {}
    fn pod_changed(&mut self, _side: Side, _pod: &str, _state: PodState) {}
    fn log(&mut self, _event: &LogEvent) {}
}

/// 何もしないオブザーバー
pub struct NoopObserver;

impl RolloutObserver for NoopObserver {}

/// コントローラが使う外部コラボレーター一式
#[derive(Clone)]
pub struct Collaborators {
    pub applier: Arc<dyn Applier>,
    pub watch: Arc<dyn ClusterWatch>,
    pub logs: Arc<dyn LogSource>,
    pub audit: Arc<dyn AuditFinalizer>,
}

/// 1回の実行の結末
#[derive(Debug)]
pub enum RunOutcome {
    /// クラスタへの反映に成功。監査に失敗した場合は警告を持つ
    Succeeded { audit_warning: Option<AuditError> },
    /// 失敗し、ローカルの変更は復元済み
    Failed(ClusterError),
    /// ユーザーが中断し、ローカルの変更は復元済み
    Aborted,
    /// 復元自体に失敗した
    RevertFailed(RevertError),
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Succeeded { .. } => exit_code::SUCCESS,
            RunOutcome::Failed(_) => exit_code::FAILED,
            RunOutcome::Aborted => exit_code::ABORTED,
            RunOutcome::RevertFailed(_) => exit_code::FATAL,
        }
    }
}

/// 実行結果と最終状態
#[derive(Debug)]
pub struct RolloutReport {
    pub outcome: RunOutcome,
    pub state: RolloutState,
}

pub struct RolloutController {
    policy: RolloutPolicy,
    log_options: LogOptions,
    collaborators: Collaborators,
}

impl RolloutController {
    pub fn new(policy: RolloutPolicy, log_options: LogOptions, collaborators: Collaborators) -> Self {
        Self {
            policy,
            log_options,
            collaborators,
        }
    }

    /// パッチ済みファイルを適用し、ロールアウトの完了まで見届ける
    ///
    /// `token` は書き込み済み（Applied）であること。どの経路で終了しても、
    /// 戻る前に監査か復元のどちらかが同期的に完了している。
    #[tracing::instrument(skip_all, fields(service = %intent.service.name, env = %intent.environment.name))]
    pub async fn run(
        &self,
        intent: &DeploymentIntent,
        token: RevertToken,
        cancel: CancellationToken,
        observer: &mut dyn RolloutObserver,
    ) -> RolloutReport {
        let mut state = RolloutState::new(self.log_options.history_lines);
        observer.phase_changed(state.phase());

        let terminal = match self.apply(&token, &cancel).await {
            Ok(()) => {
                self.enter(&mut state, RolloutPhase::Watching, observer);
                self.watch(&mut state, &cancel, observer).await
            }
            Err(phase) => phase,
        };
        self.enter(&mut state, terminal.clone(), observer);

        let outcome = self.finish(intent, token, terminal).await;
        RolloutReport { outcome, state }
    }

    async fn apply(&self, token: &RevertToken, cancel: &CancellationToken) -> Result<(), RolloutPhase> {
        info!(manifest = %token.path().display(), "Applying manifest");
        tokio::select! {
            biased;
            // apply のプロセスは future の破棄とともに停止する
            _ = cancel.cancelled() => Err(RolloutPhase::Aborted),
            result = self.collaborators.applier.apply(token.path()) => {
                result.map_err(RolloutPhase::Failed)
            }
        }
    }

    async fn watch(
        &self,
        state: &mut RolloutState,
        cancel: &CancellationToken,
        observer: &mut dyn RolloutObserver,
    ) -> RolloutPhase {
        let tasks = cancel.child_token();
        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);

        let watch = Arc::clone(&self.collaborators.watch);
        let watch_cancel = tasks.clone();
        let watch_task = tokio::spawn(async move {
            if let Err(e) = watch.watch(tx.clone(), watch_cancel).await {
                let _ = tx.send(ClusterEvent::Failed(e)).await;
            }
        });

        let mut logs = LogMultiplexer::new(
            Arc::clone(&self.collaborators.logs),
            &self.log_options,
            tasks.clone(),
        );

        let timeout = tokio::time::sleep_until(Instant::now() + self.policy.timeout());
        tokio::pin!(timeout);

        let terminal = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break RolloutPhase::Aborted,
                _ = &mut timeout => {
                    break RolloutPhase::Failed(ClusterError::Timeout {
                        secs: self.policy.timeout_secs,
                    });
                }
                event = rx.recv() => {
                    let Some(event) = event else {
                        break RolloutPhase::Failed(ClusterError::WatchEnded);
                    };
                    if let Some(phase) = self.handle_event(event, state, &mut logs, observer) {
                        if matches!(phase, RolloutPhase::Failed(ClusterError::PodCrashed { .. })) {
                            collect_crash_logs(state, &mut logs, cancel, observer).await;
                        }
                        break phase;
                    }
                }
                event = logs.recv() => forward_log(&event, state, observer),
            }
        };

        tasks.cancel();
        logs.shutdown();
        watch_task.abort();
        terminal
    }

    fn handle_event(
        &self,
        event: ClusterEvent,
        state: &mut RolloutState,
        logs: &mut LogMultiplexer,
        observer: &mut dyn RolloutObserver,
    ) -> Option<RolloutPhase> {
        match event {
            ClusterEvent::Pod(pod) => {
                let pod_state = self.policy.classify(&pod);
                if state.update_pod(pod.side, &pod.name, pod_state) {
                    debug!(side = %pod.side, pod = %pod.name, state = %pod_state, "Pod changed");
                    observer.pod_changed(pod.side, &pod.name, pod_state);
                }

                if logs.attached(pod.side).is_none() && wants_logs(pod.side, pod_state) {
                    logs.attach(pod.side, &pod.name);
                }

                if pod.side == Side::New && pod_state == PodState::Crashed {
                    return Some(RolloutPhase::Failed(ClusterError::PodCrashed {
                        pod: pod.name.clone(),
                        reason: pod.reason().to_string(),
                    }));
                }
            }
            ClusterEvent::PodGone { name, side } => {
                if state.remove_pod(side, &name) {
                    observer.pod_changed(side, &name, PodState::Gone);
                }
                if logs.attached(side) == Some(name.as_str()) {
                    logs.detach(side);
                    let next = state
                        .pods(side)
                        .iter()
                        .find(|(_, s)| wants_logs(side, **s))
                        .map(|(n, _)| n.clone());
                    if let Some(next) = next {
                        logs.attach(side, &next);
                    }
                }
            }
            ClusterEvent::Synced => {
                debug!("Initial pod listing complete");
                state.mark_synced();
            }
            ClusterEvent::Failed(e) => return Some(RolloutPhase::Failed(e)),
        }

        state.is_complete(&self.policy).then_some(RolloutPhase::Succeeded)
    }

    fn enter(
        &self,
        state: &mut RolloutState,
        phase: RolloutPhase,
        observer: &mut dyn RolloutObserver,
    ) {
        match state.transition(phase) {
            Ok(()) => {
                info!(phase = %state.phase(), "Rollout phase changed");
                observer.phase_changed(state.phase());
            }
            Err(e) => warn!(error = %e, "Ignoring invalid phase transition"),
        }
    }

    async fn finish(
        &self,
        intent: &DeploymentIntent,
        token: RevertToken,
        terminal: RolloutPhase,
    ) -> RunOutcome {
        match terminal {
            RolloutPhase::Succeeded => {
                let audited = self.collaborators.audit.finalize(intent, token.path()).await;
                match audited {
                    Ok(()) => {
                        token.discard();
                        RunOutcome::Succeeded {
                            audit_warning: None,
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Audit failed after successful rollout");
                        token.keep_patched();
                        RunOutcome::Succeeded {
                            audit_warning: Some(e),
                        }
                    }
                }
            }
            RolloutPhase::Failed(e) => revert(token).unwrap_or(RunOutcome::Failed(e)),
            RolloutPhase::Aborted | RolloutPhase::Applying | RolloutPhase::Watching => {
                revert(token).unwrap_or(RunOutcome::Aborted)
            }
        }
    }
}

/// 元の内容に戻す。失敗した場合だけ結末を返す
fn revert(mut token: RevertToken) -> Option<RunOutcome> {
    match token.restore() {
        Ok(()) => None,
        Err(e) => {
            // 期待される内容はエラーに含まれている。Drop で再試行させない
            token.keep_patched();
            Some(RunOutcome::RevertFailed(e))
        }
    }
}

/// ログを読みたい Pod か（旧は消えるまで、新は起動後）
fn wants_logs(side: Side, state: PodState) -> bool {
    match side {
        Side::Old => !matches!(state, PodState::Gone),
        Side::New => matches!(
            state,
            PodState::Running | PodState::Ready | PodState::Crashed
        ),
    }
}

fn forward_log(event: &LogEvent, state: &mut RolloutState, observer: &mut dyn RolloutObserver) {
    if let LogEvent::Ended {
        side,
        pod,
        error: Some(e),
    } = event
    {
        warn!(side = %side, pod = %pod, error = %e, "Log stream ended with error");
    }
    state.record_log(event);
    observer.log(event);
}

/// クラッシュした新 Pod のログを失敗の確定前に集める
///
/// 新 Pod 側のストリームが終わるか `CRASH_LOG_GRACE` が過ぎるまで待つ。
async fn collect_crash_logs(
    state: &mut RolloutState,
    logs: &mut LogMultiplexer,
    cancel: &CancellationToken,
    observer: &mut dyn RolloutObserver,
) {
    if logs.attached(Side::New).is_none() {
        return;
    }
    debug!("Collecting logs from crashed pod");

    let grace = tokio::time::sleep(CRASH_LOG_GRACE);
    tokio::pin!(grace);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = &mut grace => return,
            event = logs.recv() => {
                forward_log(&event, state, observer);
                if matches!(event, LogEvent::Ended { side: Side::New, .. }) {
                    return;
                }
            }
        }
    }
}
