//! Pod の監視
//!
//! ラベルセレクタに一致する Pod を watcher で追い、対象コンテナのイメージで
//! 旧 Pod / 新 Pod に振り分けてコントローラへ送る。

use async_trait::async_trait;
use davit_core::{ClusterError, ClusterEvent, ClusterWatch, PodObservation, Side};
use futures_util::{StreamExt, pin_mut};
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Api, Client};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 連続してこの回数エラーになったら監視を諦める
const MAX_CONSECUTIVE_ERRORS: u32 = 3;

/// `kube` の watcher による Pod 監視
pub struct KubeWatch {
    api: Api<Pod>,
    selector: String,
    container: String,
    new_image: String,
}

impl KubeWatch {
    pub fn new(
        client: Client,
        namespace: &str,
        selector: impl Into<String>,
        container: impl Into<String>,
        new_image: impl Into<String>,
    ) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            selector: selector.into(),
            container: container.into(),
            new_image: new_image.into(),
        }
    }
}

/// Pod を観測値に変換する。対象コンテナを持たない Pod は対象外
pub fn observe(pod: &Pod, container: &str, new_image: &str) -> Option<PodObservation> {
    let name = pod.metadata.name.clone()?;
    let spec = pod.spec.as_ref()?;
    let target = spec.containers.iter().find(|c| c.name == container)?;
    let side = if target.image.as_deref() == Some(new_image) {
        Side::New
    } else {
        Side::Old
    };

    let status = pod.status.as_ref();
    let phase = status
        .and_then(|s| s.phase.clone())
        .unwrap_or_else(|| "Unknown".to_string());
    let container_status: Option<&ContainerStatus> = status
        .and_then(|s| s.container_statuses.as_ref())
        .and_then(|statuses| statuses.iter().find(|s| s.name == container));

    let mut observation = PodObservation::new(name, side, phase);
    observation.terminating = pod.metadata.deletion_timestamp.is_some();

    // 直前の終了理由 (last_state) は見ない。再起動の多さは restarts で判定する
    if let Some(cs) = container_status {
        observation.ready = cs.ready;
        observation.restarts = u32::try_from(cs.restart_count).unwrap_or(0);
        observation.waiting_reason = cs
            .state
            .as_ref()
            .and_then(|s| s.waiting.as_ref())
            .and_then(|w| w.reason.clone());
        observation.terminated_reason = cs
            .state
            .as_ref()
            .and_then(|s| s.terminated.as_ref())
            .and_then(|t| t.reason.clone());
    }

    Some(observation)
}

/// watcher のイベントをコントローラのイベントに変換する
///
/// 再一覧（Init → InitApply → InitDone）の間に消えた Pod は
/// InitDone の時点で削除として通知する。
struct Translator<'a> {
    container: &'a str,
    new_image: &'a str,
    known: BTreeMap<String, Side>,
    relisting: Option<BTreeSet<String>>,
}

impl<'a> Translator<'a> {
    fn new(container: &'a str, new_image: &'a str) -> Self {
        Self {
            container,
            new_image,
            known: BTreeMap::new(),
            relisting: None,
        }
    }

    fn translate(&mut self, event: watcher::Event<Pod>) -> Vec<ClusterEvent> {
        match event {
            watcher::Event::Init => {
                self.relisting = Some(BTreeSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(pod) => {
                let Some(obs) = observe(&pod, self.container, self.new_image) else {
                    return Vec::new();
                };
                if let Some(seen) = self.relisting.as_mut() {
                    seen.insert(obs.name.clone());
                }
                self.known.insert(obs.name.clone(), obs.side);
                vec![ClusterEvent::Pod(obs)]
            }
            watcher::Event::InitDone => {
                let seen = self.relisting.take().unwrap_or_default();
                let vanished: Vec<(String, Side)> = self
                    .known
                    .iter()
                    .filter(|(name, _)| !seen.contains(*name))
                    .map(|(name, side)| (name.clone(), *side))
                    .collect();
                let mut events: Vec<ClusterEvent> = vanished
                    .into_iter()
                    .map(|(name, side)| {
                        self.known.remove(&name);
                        ClusterEvent::PodGone { name, side }
                    })
                    .collect();
                events.push(ClusterEvent::Synced);
                events
            }
            watcher::Event::Apply(pod) => match observe(&pod, self.container, self.new_image) {
                Some(obs) => {
                    self.known.insert(obs.name.clone(), obs.side);
                    vec![ClusterEvent::Pod(obs)]
                }
                None => Vec::new(),
            },
            watcher::Event::Delete(pod) => {
                let Some(name) = pod.metadata.name.clone() else {
                    return Vec::new();
                };
                let side = self
                    .known
                    .remove(&name)
                    .or_else(|| observe(&pod, self.container, self.new_image).map(|o| o.side));
                match side {
                    Some(side) => vec![ClusterEvent::PodGone { name, side }],
                    None => Vec::new(),
                }
            }
        }
    }
}

#[async_trait]
impl ClusterWatch for KubeWatch {
    async fn watch(
        &self,
        events: mpsc::Sender<ClusterEvent>,
        cancel: CancellationToken,
    ) -> Result<(), ClusterError> {
        let config = watcher::Config::default().labels(&self.selector);
        let stream = watcher(self.api.clone(), config).default_backoff();
        pin_mut!(stream);

        debug!(selector = %self.selector, "Watching pods");
        let mut translator = Translator::new(&self.container, &self.new_image);
        let mut consecutive_errors = 0;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                next = stream.next() => next,
            };

            match next {
                Some(Ok(event)) => {
                    consecutive_errors = 0;
                    for event in translator.translate(event) {
                        if events.send(event).await.is_err() {
                            return Ok(());
                        }
                    }
                }
                Some(Err(e)) => {
                    consecutive_errors += 1;
                    warn!(error = %e, attempt = consecutive_errors, "Pod watch error");
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        return Err(ClusterError::WatchFailed(e.to_string()));
                    }
                }
                None => return Err(ClusterError::WatchEnded),
            }
        }
    }
}
