//! Pod ログのストリーミング

use async_trait::async_trait;
use davit_core::{ClusterError, LogSource, LogStream};
use futures_util::io::AsyncBufReadExt;
use futures_util::{StreamExt, pin_mut, stream};
use k8s_openapi::api::core::v1::Pod;
use kube::api::LogParams;
use kube::{Api, Client};
use tokio::sync::mpsc;

const LINE_BUFFER: usize = 64;

/// `pods/log?follow=true` を行単位で読む
pub struct KubeLogSource {
    api: Api<Pod>,
    container: String,
    tail_lines: i64,
}

impl KubeLogSource {
    pub fn new(client: Client, namespace: &str, container: impl Into<String>, tail_lines: i64) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            container: container.into(),
            tail_lines,
        }
    }

    pub fn params(&self) -> LogParams {
        LogParams {
            follow: true,
            tail_lines: Some(self.tail_lines),
            container: Some(self.container.clone()),
            timestamps: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl LogSource for KubeLogSource {
    async fn open(&self, pod: &str) -> Result<LogStream, ClusterError> {
        let api = self.api.clone();
        let params = self.params();
        let pod = pod.to_string();
        let (tx, rx) = mpsc::channel::<Result<String, ClusterError>>(LINE_BUFFER);

        // 読み取りは別タスクで行い、受信側が破棄されたら止める
        tokio::spawn(async move {
            let reader = match api.log_stream(&pod, &params).await {
                Ok(reader) => reader,
                Err(e) => {
                    let _ = tx
                        .send(Err(ClusterError::LogStream {
                            pod: pod.clone(),
                            message: e.to_string(),
                        }))
                        .await;
                    return;
                }
            };

            let lines = reader.lines();
            pin_mut!(lines);
            loop {
                let next = tokio::select! {
                    _ = tx.closed() => return,
                    next = lines.next() => next,
                };
                let item = match next {
                    Some(Ok(line)) => Ok(line),
                    Some(Err(e)) => Err(ClusterError::LogStream {
                        pod: pod.clone(),
                        message: e.to_string(),
                    }),
                    None => return,
                };
                let failed = item.is_err();
                if tx.send(item).await.is_err() || failed {
                    return;
                }
            }
        });

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }
}
