//! ロールアウトコントローラのシナリオテスト
//!
//! クラスタ・ログ・Git はすべてメモリ上のフェイクで置き換える。

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use davit_core::{
    Applier, AuditError, AuditFinalizer, ClusterError, ClusterEvent, ClusterWatch,
    Collaborators, DeploymentIntent, Environment, ImageCandidate, LogEvent, LogOptions,
    LogSource, LogStream, PodObservation, PodState, RevertToken, RolloutController,
    RolloutObserver, RolloutPhase, RolloutPolicy, RunOutcome, Service, Side, exit_code, patch,
    snapshot,
};
use futures_util::StreamExt;
use futures_util::stream;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const ORIGINAL: &str = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: payment-service
spec:
  template:
    spec:
      containers:
        - name: payment-service
          image: gcr.io/acme/payment-service:v1.4.0
        - name: istio-proxy
          image: docker.io/istio/proxyv2:1.20.0
"#;

// ---------------------------------------------------------------------------
// フェイク
// ---------------------------------------------------------------------------

enum ApplyBehavior {
    Succeed,
    Fail,
    Hang,
    /// マニフェストのディレクトリを消してから失敗する（復元できなくなる）
    BreakDisk,
}

struct FakeApplier {
    behavior: ApplyBehavior,
    calls: AtomicUsize,
}

#[async_trait]
impl Applier for FakeApplier {
    async fn apply(&self, manifest: &Path) -> Result<(), ClusterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            ApplyBehavior::Succeed => Ok(()),
            ApplyBehavior::Fail => Err(ClusterError::ApplyFailed {
                status: Some(1),
                stderr: "error: the server rejected the manifest".to_string(),
            }),
            ApplyBehavior::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
            ApplyBehavior::BreakDisk => {
                std::fs::remove_dir_all(manifest.parent().unwrap()).unwrap();
                Err(ClusterError::ApplyFailed {
                    status: Some(1),
                    stderr: "boom".to_string(),
                })
            }
        }
    }
}

enum Step {
    Send(ClusterEvent),
    Sleep(Duration),
    Fail(ClusterError),
    End,
}

struct ScriptedWatch {
    script: Mutex<Vec<Step>>,
    started: AtomicUsize,
}

impl ScriptedWatch {
    fn new(script: Vec<Step>) -> Self {
        Self {
            script: Mutex::new(script),
            started: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ClusterWatch for ScriptedWatch {
    async fn watch(
        &self,
        events: mpsc::Sender<ClusterEvent>,
        cancel: CancellationToken,
    ) -> Result<(), ClusterError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let script = std::mem::take(&mut *self.script.lock().unwrap());
        for step in script {
            match step {
                Step::Send(event) => {
                    if events.send(event).await.is_err() {
                        return Ok(());
                    }
                }
                Step::Sleep(duration) => tokio::time::sleep(duration).await,
                Step::Fail(e) => return Err(e),
                Step::End => return Ok(()),
            }
        }
        cancel.cancelled().await;
        Ok(())
    }
}

#[derive(Default)]
struct StaticLogs {
    lines: HashMap<String, Vec<String>>,
}

#[async_trait]
impl LogSource for StaticLogs {
    async fn open(&self, pod: &str) -> Result<LogStream, ClusterError> {
        let lines = self.lines.get(pod).cloned().unwrap_or_default();
        // 行を出し終えたら Pod が消えるまで開いたままにする
        Ok(stream::iter(lines.into_iter().map(Ok))
            .chain(stream::pending())
            .boxed())
    }
}

#[derive(Default)]
struct RecordingAudit {
    messages: Mutex<Vec<String>>,
    fail: bool,
}

#[async_trait]
impl AuditFinalizer for RecordingAudit {
    async fn finalize(&self, intent: &DeploymentIntent, _manifest: &Path) -> Result<(), AuditError> {
        self.messages.lock().unwrap().push(intent.commit_message());
        if self.fail {
            return Err(AuditError::StepFailed {
                step: "push".to_string(),
                message: "rejected".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
struct RecordingObserver {
    phases: Vec<String>,
    pods: Vec<(Side, String, PodState)>,
    lines: Vec<(Side, String)>,
}

impl RolloutObserver for RecordingObserver {
    fn phase_changed(&mut self, phase: &RolloutPhase) {
        self.phases.push(phase.name().to_string());
    }

    fn pod_changed(&mut self, side: Side, pod: &str, state: PodState) {
        self.pods.push((side, pod.to_string(), state));
    }

    fn log(&mut self, event: &LogEvent) {
        if let LogEvent::Line(line) = event {
            self.lines.push((line.side, line.message.clone()));
        }
    }
}

// ---------------------------------------------------------------------------
// ヘルパー
// ---------------------------------------------------------------------------

struct Fixture {
    _temp: TempDir,
    path: PathBuf,
    intent: DeploymentIntent,
}

fn fixture() -> Fixture {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("staging");
    std::fs::create_dir_all(&root).unwrap();
    let path = root.join("deployment.yaml");
    std::fs::write(&path, ORIGINAL).unwrap();

    let environment = Environment::new("staging", &root, "gke-staging");
    let service = Service {
        name: "payment-service".to_string(),
        environment: "staging".to_string(),
        file_path: path.clone(),
        relative_path: PathBuf::from("deployment.yaml"),
        container: "payment-service".to_string(),
        current_image: "gcr.io/acme/payment-service:v1.4.0".to_string(),
        workload: "payment-service".to_string(),
        namespace: None,
        selector: BTreeMap::new(),
    };
    let image = ImageCandidate {
        registry_path: "gcr.io/acme/payment-service".to_string(),
        tag: "v1.5.0".to_string(),
        digest: "abc1234".to_string(),
        updated_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
    };

    Fixture {
        _temp: temp,
        path,
        intent: DeploymentIntent {
            environment,
            service,
            image,
            dry_run: false,
        },
    }
}

fn write_patch(fx: &Fixture) -> RevertToken {
    let result = patch(
        ORIGINAL,
        &fx.intent.service.container,
        &fx.intent.new_image_reference(),
    )
    .unwrap();
    let mut token = snapshot(&fx.path).unwrap();
    token.write_patched(result.patched.as_bytes()).unwrap();
    token
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

struct Harness {
    applier: Arc<FakeApplier>,
    watch: Arc<ScriptedWatch>,
    audit: Arc<RecordingAudit>,
    controller: RolloutController,
}

fn harness(behavior: ApplyBehavior, script: Vec<Step>, logs: StaticLogs, audit_fails: bool) -> Harness {
    harness_with_policy(behavior, script, logs, audit_fails, RolloutPolicy::default())
}

fn harness_with_policy(
    behavior: ApplyBehavior,
    script: Vec<Step>,
    logs: StaticLogs,
    audit_fails: bool,
    policy: RolloutPolicy,
) -> Harness {
    let applier = Arc::new(FakeApplier {
        behavior,
        calls: AtomicUsize::new(0),
    });
    let watch = Arc::new(ScriptedWatch::new(script));
    let audit = Arc::new(RecordingAudit {
        fail: audit_fails,
        ..Default::default()
    });
    let controller = RolloutController::new(
        policy,
        LogOptions::default(),
        Collaborators {
            applier: applier.clone(),
            watch: watch.clone(),
            logs: Arc::new(logs),
            audit: audit.clone(),
        },
    );
    Harness {
        applier,
        watch,
        audit,
        controller,
    }
}

fn pod(name: &str, side: Side, phase: &str, ready: bool) -> Step {
    Step::Send(ClusterEvent::Pod(
        PodObservation::new(name, side, phase).ready(ready),
    ))
}

fn gone(name: &str, side: Side) -> Step {
    Step::Send(ClusterEvent::PodGone {
        name: name.to_string(),
        side,
    })
}

fn successful_rollout() -> Vec<Step> {
    vec![
        pod("payment-old-1", Side::Old, "Running", true),
        Step::Send(ClusterEvent::Synced),
        pod("payment-new-1", Side::New, "Pending", false),
        pod("payment-new-1", Side::New, "Running", false),
        pod("payment-new-1", Side::New, "Running", true),
        Step::Send(ClusterEvent::Pod(
            PodObservation::new("payment-old-1", Side::Old, "Running")
                .ready(true)
                .terminating(),
        )),
        gone("payment-old-1", Side::Old),
    ]
}

fn assert_monotonic(phases: &[String]) {
    let rank = |p: &str| match p {
        "Applying" => 0,
        "Watching" => 1,
        _ => 2,
    };
    assert!(
        phases.windows(2).all(|w| rank(&w[0]) < rank(&w[1])),
        "phases must move forward: {:?}",
        phases
    );
}

// ---------------------------------------------------------------------------
// シナリオ
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_apply_failure_reverts_and_skips_watch() {
    let fx = fixture();
    let token = write_patch(&fx);
    assert_ne!(read(&fx.path), ORIGINAL);

    let h = harness(ApplyBehavior::Fail, vec![], StaticLogs::default(), false);
    let mut observer = RecordingObserver::default();
    let report = h
        .controller
        .run(&fx.intent, token, CancellationToken::new(), &mut observer)
        .await;

    assert!(matches!(
        report.outcome,
        RunOutcome::Failed(ClusterError::ApplyFailed { .. })
    ));
    assert_eq!(report.outcome.exit_code(), exit_code::FAILED);
    assert_eq!(observer.phases, vec!["Applying", "Failed"]);
    assert_eq!(read(&fx.path), ORIGINAL);
    assert_eq!(h.applier.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.watch.started.load(Ordering::SeqCst), 0);
    assert!(h.audit.messages.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_successful_rollout_audits_once() {
    let fx = fixture();
    let token = write_patch(&fx);

    let h = harness(
        ApplyBehavior::Succeed,
        successful_rollout(),
        StaticLogs::default(),
        false,
    );
    let mut observer = RecordingObserver::default();
    let report = h
        .controller
        .run(&fx.intent, token, CancellationToken::new(), &mut observer)
        .await;

    assert!(matches!(
        report.outcome,
        RunOutcome::Succeeded {
            audit_warning: None
        }
    ));
    assert_eq!(report.outcome.exit_code(), exit_code::SUCCESS);
    assert_eq!(observer.phases, vec!["Applying", "Watching", "Succeeded"]);
    assert_eq!(
        *h.audit.messages.lock().unwrap(),
        vec!["feat(deploy): update payment-service to v1.5.0 in staging".to_string()]
    );
    assert!(read(&fx.path).contains("gcr.io/acme/payment-service:v1.5.0"));
    assert_eq!(
        report.state.pods(Side::New).get("payment-new-1"),
        Some(&PodState::Ready)
    );
    assert_eq!(
        report.state.pods(Side::Old).get("payment-old-1"),
        Some(&PodState::Gone)
    );
}

#[tokio::test]
async fn test_interrupt_while_watching_aborts_and_reverts() {
    let fx = fixture();
    let token = write_patch(&fx);

    let h = harness(
        ApplyBehavior::Succeed,
        vec![
            pod("payment-old-1", Side::Old, "Running", true),
            Step::Send(ClusterEvent::Synced),
            pod("payment-new-1", Side::New, "Pending", false),
        ],
        StaticLogs::default(),
        false,
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let mut observer = RecordingObserver::default();
    let report = h.controller.run(&fx.intent, token, cancel, &mut observer).await;

    assert!(matches!(report.outcome, RunOutcome::Aborted));
    assert_eq!(report.outcome.exit_code(), exit_code::ABORTED);
    assert_eq!(observer.phases, vec!["Applying", "Watching", "Aborted"]);
    assert_eq!(read(&fx.path), ORIGINAL);
    assert!(h.audit.messages.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_interrupt_while_applying_aborts() {
    let fx = fixture();
    let token = write_patch(&fx);
    let h = harness(ApplyBehavior::Hang, vec![], StaticLogs::default(), false);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let mut observer = RecordingObserver::default();
    let report = h.controller.run(&fx.intent, token, cancel, &mut observer).await;

    assert!(matches!(report.outcome, RunOutcome::Aborted));
    assert_eq!(observer.phases, vec!["Applying", "Aborted"]);
    assert_eq!(read(&fx.path), ORIGINAL);
    assert_eq!(h.watch.started.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_fails_and_reverts() {
    let fx = fixture();
    let token = write_patch(&fx);
    let policy = RolloutPolicy {
        timeout_secs: 30,
        ..Default::default()
    };
    let h = harness_with_policy(
        ApplyBehavior::Succeed,
        vec![
            Step::Send(ClusterEvent::Synced),
            pod("payment-new-1", Side::New, "Pending", false),
        ],
        StaticLogs::default(),
        false,
        policy,
    );

    let mut observer = RecordingObserver::default();
    let report = h
        .controller
        .run(&fx.intent, token, CancellationToken::new(), &mut observer)
        .await;

    assert!(matches!(
        report.outcome,
        RunOutcome::Failed(ClusterError::Timeout { secs: 30 })
    ));
    assert_eq!(report.outcome.exit_code(), exit_code::FAILED);
    assert_eq!(read(&fx.path), ORIGINAL);
}

#[tokio::test(start_paused = true)]
async fn test_crashing_new_pod_fails() {
    let fx = fixture();
    let token = write_patch(&fx);
    let h = harness(
        ApplyBehavior::Succeed,
        vec![
            pod("payment-old-1", Side::Old, "Running", true),
            Step::Send(ClusterEvent::Synced),
            Step::Send(ClusterEvent::Pod(
                PodObservation::new("payment-new-1", Side::New, "Pending")
                    .waiting("ImagePullBackOff"),
            )),
        ],
        StaticLogs::default(),
        false,
    );

    let mut observer = RecordingObserver::default();
    let report = h
        .controller
        .run(&fx.intent, token, CancellationToken::new(), &mut observer)
        .await;

    match &report.outcome {
        RunOutcome::Failed(ClusterError::PodCrashed { pod, reason }) => {
            assert_eq!(pod, "payment-new-1");
            assert_eq!(reason, "ImagePullBackOff");
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(read(&fx.path), ORIGINAL);
    assert!(h.audit.messages.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_crash_looping_pod_logs_are_collected() {
    let fx = fixture();
    let token = write_patch(&fx);
    let logs = StaticLogs {
        lines: HashMap::from([(
            "payment-new-1".to_string(),
            vec![
                "2024-05-01T10:00:02Z starting payment-service v1.5.0".to_string(),
                "2024-05-01T10:00:03Z panic: DATABASE_URL is not set".to_string(),
            ],
        )]),
    };
    let h = harness(
        ApplyBehavior::Succeed,
        vec![
            pod("payment-old-1", Side::Old, "Running", true),
            Step::Send(ClusterEvent::Synced),
            pod("payment-new-1", Side::New, "Pending", false),
            // Ready になる前にクラッシュループに入る
            Step::Send(ClusterEvent::Pod(
                PodObservation::new("payment-new-1", Side::New, "Running")
                    .waiting("CrashLoopBackOff"),
            )),
        ],
        logs,
        false,
    );

    let mut observer = RecordingObserver::default();
    let report = h
        .controller
        .run(&fx.intent, token, CancellationToken::new(), &mut observer)
        .await;

    assert!(matches!(
        report.outcome,
        RunOutcome::Failed(ClusterError::PodCrashed { .. })
    ));
    let new: Vec<_> = observer
        .lines
        .iter()
        .filter(|(side, _)| *side == Side::New)
        .map(|(_, m)| m.as_str())
        .collect();
    assert_eq!(
        new,
        vec![
            "starting payment-service v1.5.0",
            "panic: DATABASE_URL is not set"
        ]
    );
    assert_eq!(report.state.logs(Side::New).len(), 2);
    assert_eq!(read(&fx.path), ORIGINAL);
}

#[tokio::test]
async fn test_watch_stream_failure_is_reported() {
    let fx = fixture();
    let token = write_patch(&fx);
    let h = harness(
        ApplyBehavior::Succeed,
        vec![
            Step::Send(ClusterEvent::Synced),
            Step::Fail(ClusterError::WatchFailed("connection reset".to_string())),
        ],
        StaticLogs::default(),
        false,
    );

    let report = h
        .controller
        .run(
            &fx.intent,
            token,
            CancellationToken::new(),
            &mut RecordingObserver::default(),
        )
        .await;

    assert!(matches!(
        report.outcome,
        RunOutcome::Failed(ClusterError::WatchFailed(_))
    ));
    assert_eq!(read(&fx.path), ORIGINAL);
}

#[tokio::test]
async fn test_watch_ending_silently_is_a_failure() {
    let fx = fixture();
    let token = write_patch(&fx);
    let h = harness(
        ApplyBehavior::Succeed,
        vec![Step::End],
        StaticLogs::default(),
        false,
    );

    let report = h
        .controller
        .run(
            &fx.intent,
            token,
            CancellationToken::new(),
            &mut RecordingObserver::default(),
        )
        .await;

    assert!(matches!(
        report.outcome,
        RunOutcome::Failed(ClusterError::WatchEnded)
    ));
}

#[tokio::test]
async fn test_audit_failure_is_a_warning() {
    let fx = fixture();
    let token = write_patch(&fx);
    let h = harness(
        ApplyBehavior::Succeed,
        successful_rollout(),
        StaticLogs::default(),
        true,
    );

    let report = h
        .controller
        .run(
            &fx.intent,
            token,
            CancellationToken::new(),
            &mut RecordingObserver::default(),
        )
        .await;

    assert!(matches!(
        report.outcome,
        RunOutcome::Succeeded {
            audit_warning: Some(AuditError::StepFailed { .. })
        }
    ));
    assert_eq!(report.outcome.exit_code(), exit_code::SUCCESS);
    // クラスタには反映済みなので、ローカルの変更も残す
    assert!(read(&fx.path).contains("v1.5.0"));
    assert_eq!(h.audit.messages.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_revert_failure_is_fatal() {
    let fx = fixture();
    let token = write_patch(&fx);
    let h = harness(ApplyBehavior::BreakDisk, vec![], StaticLogs::default(), false);

    let report = h
        .controller
        .run(
            &fx.intent,
            token,
            CancellationToken::new(),
            &mut RecordingObserver::default(),
        )
        .await;

    let code = report.outcome.exit_code();
    match report.outcome {
        RunOutcome::RevertFailed(e) => {
            assert!(e.is_fatal());
            assert!(e.to_string().contains("gcr.io/acme/payment-service:v1.4.0"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(code, exit_code::FATAL);
    assert!(matches!(report.state.phase(), RolloutPhase::Failed(_)));
}

#[tokio::test]
async fn test_logs_from_both_sides_reach_observer() {
    let fx = fixture();
    let token = write_patch(&fx);
    let logs = StaticLogs {
        lines: HashMap::from([
            (
                "payment-old-1".to_string(),
                vec![
                    "2024-05-01T10:00:00Z draining connections".to_string(),
                    "2024-05-01T10:00:01Z shutdown complete".to_string(),
                ],
            ),
            (
                "payment-new-1".to_string(),
                vec![r#"{"severity":"info","message":"listening on :8080"}"#.to_string()],
            ),
        ]),
    };
    let h = harness(
        ApplyBehavior::Succeed,
        vec![
            pod("payment-old-1", Side::Old, "Running", true),
            Step::Send(ClusterEvent::Synced),
            pod("payment-new-1", Side::New, "Running", true),
            Step::Sleep(Duration::from_millis(100)),
            gone("payment-old-1", Side::Old),
        ],
        logs,
        false,
    );

    let mut observer = RecordingObserver::default();
    let report = h
        .controller
        .run(&fx.intent, token, CancellationToken::new(), &mut observer)
        .await;

    assert!(matches!(report.outcome, RunOutcome::Succeeded { .. }));
    let old: Vec<_> = observer
        .lines
        .iter()
        .filter(|(side, _)| *side == Side::Old)
        .map(|(_, m)| m.as_str())
        .collect();
    assert_eq!(old, vec!["draining connections", "shutdown complete"]);
    assert!(
        observer
            .lines
            .contains(&(Side::New, "listening on :8080".to_string()))
    );
    assert_eq!(report.state.logs(Side::Old).len(), 2);
    assert_monotonic(&observer.phases);
}

#[tokio::test]
async fn test_phase_sequences_are_monotonic() {
    let scripts: Vec<Vec<Step>> = vec![
        successful_rollout(),
        vec![Step::End],
        vec![Step::Fail(ClusterError::WatchFailed("x".to_string()))],
        vec![
            Step::Send(ClusterEvent::Synced),
            Step::Send(ClusterEvent::Pod(
                PodObservation::new("n", Side::New, "Failed"),
            )),
        ],
    ];

    for script in scripts {
        let fx = fixture();
        let token = write_patch(&fx);
        let h = harness(ApplyBehavior::Succeed, script, StaticLogs::default(), false);
        let mut observer = RecordingObserver::default();
        let report = h
            .controller
            .run(&fx.intent, token, CancellationToken::new(), &mut observer)
            .await;

        assert_monotonic(&observer.phases);
        assert!(report.state.phase().is_terminal());
        assert_eq!(observer.phases.first().map(String::as_str), Some("Applying"));
        assert_eq!(
            observer.phases.iter().filter(|p| *p == "Applying").count(),
            1
        );
    }
}
