//! 旧 Pod・新 Pod のログを並行に読むマルチプレクサ
//!
//! 各側のリーダーは独立したタスクで動き、側ごとの有界な broadcast チャネルへ
//! 送る。送信はブロックしないため、消費側が遅れても古い行から捨てられ、
//! リーダーもステートマシンも待たされない。捨てられた行は
//! [`LogEvent::Dropped`] として1回の遅延につき1度だけ通知される。

use crate::error::ClusterError;
use crate::provider::LogSource;
use crate::rollout::Side;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// ログ表示の設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogOptions {
    /// 側ごとの未消費行の上限
    pub buffer_lines: usize,
    /// 接続時に遡って取得する行数
    pub tail_lines: i64,
    /// 状態として保持する直近の行数
    pub history_lines: usize,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            buffer_lines: 256,
            tail_lines: 10,
            history_lines: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub side: Side,
    pub pod: String,
    /// 発生元のタイムスタンプ（取得できた場合）
    pub timestamp: Option<DateTime<Utc>>,
    /// JSON ログの severity / level
    pub level: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    Line(LogLine),
    /// 消費が追いつかず `count` 行を捨てた
    Dropped { side: Side, count: u64 },
    /// リーダーが終了した（キャンセル時は送られない）
    Ended {
        side: Side,
        pod: String,
        error: Option<ClusterError>,
    },
}

impl LogEvent {
    pub fn side(&self) -> Side {
        match self {
            LogEvent::Line(line) => line.side,
            LogEvent::Dropped { side, .. } | LogEvent::Ended { side, .. } => *side,
        }
    }
}

/// 生のログ行を解釈する
///
/// 先頭の RFC 3339 タイムスタンプ（`timestamps=true` で付与される）と、
/// JSON 構造化ログの level / timestamp / message を取り出す。
pub fn parse_line(side: Side, pod: &str, raw: &str) -> LogLine {
    let raw = raw.trim_end_matches(['\r', '\n']);
    let (mut timestamp, rest) = split_timestamp(raw);
    let mut level = None;
    let mut message = rest.to_string();

    if rest.trim_start().starts_with('{')
        && let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(rest)
    {
        level = ["severity", "level"]
            .iter()
            .find_map(|key| fields.get(*key).and_then(Value::as_str))
            .map(str::to_uppercase);

        if let Some(ts) = ["timestamp", "time"]
            .iter()
            .find_map(|key| fields.get(*key).and_then(Value::as_str))
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        {
            timestamp = Some(ts.with_timezone(&Utc));
        }

        let text = ["message", "msg", "textPayload"]
            .iter()
            .find_map(|key| fields.get(*key).and_then(Value::as_str))
            .or_else(|| {
                fields
                    .get("fields")
                    .and_then(|f| f.get("message"))
                    .and_then(Value::as_str)
            });
        if let Some(text) = text {
            message = text.to_string();
        }
    }

    LogLine {
        side,
        pod: pod.to_string(),
        timestamp,
        level,
        message,
    }
}

fn split_timestamp(raw: &str) -> (Option<DateTime<Utc>>, &str) {
    if let Some((head, tail)) = raw.split_once(' ')
        && let Ok(ts) = DateTime::parse_from_rfc3339(head)
    {
        return (Some(ts.with_timezone(&Utc)), tail);
    }
    (None, raw)
}

/// 片側のリーダー
struct Lane {
    sender: broadcast::Sender<LogEvent>,
    receiver: broadcast::Receiver<LogEvent>,
    attached: Option<(String, CancellationToken)>,
}

impl Lane {
    fn new(capacity: usize) -> Self {
        let (sender, receiver) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            receiver,
            attached: None,
        }
    }

    fn detach(&mut self) {
        if let Some((pod, token)) = self.attached.take() {
            debug!(pod = %pod, "Detaching log reader");
            token.cancel();
        }
    }
}

/// 2つのログリーダーを管理し、到着順に1本のイベント列として返す
pub struct LogMultiplexer {
    source: Arc<dyn LogSource>,
    parent: CancellationToken,
    old: Lane,
    new: Lane,
    /// 一度でも接続した Pod（同じ Pod のログを重複して読まない）
    seen: BTreeSet<String>,
}

impl LogMultiplexer {
    /// `parent` がキャンセルされると全てのリーダーが止まる
    pub fn new(source: Arc<dyn LogSource>, options: &LogOptions, parent: CancellationToken) -> Self {
        Self {
            source,
            parent,
            old: Lane::new(options.buffer_lines),
            new: Lane::new(options.buffer_lines),
            seen: BTreeSet::new(),
        }
    }

    fn lane_mut(&mut self, side: Side) -> &mut Lane {
        match side {
            Side::Old => &mut self.old,
            Side::New => &mut self.new,
        }
    }

    /// 現在接続中の Pod
    pub fn attached(&self, side: Side) -> Option<&str> {
        let lane = match side {
            Side::Old => &self.old,
            Side::New => &self.new,
        };
        lane.attached.as_ref().map(|(pod, _)| pod.as_str())
    }

    /// `pod` のログ読み取りを開始する。既に読んだことのある Pod なら何もしない
    pub fn attach(&mut self, side: Side, pod: &str) -> bool {
        if !self.seen.insert(pod.to_string()) {
            return false;
        }

        let token = self.parent.child_token();
        let source = Arc::clone(&self.source);
        let lane = self.lane_mut(side);
        lane.detach();
        let sender = lane.sender.clone();
        lane.attached = Some((pod.to_string(), token.clone()));

        debug!(side = %side, pod = %pod, "Attaching log reader");
        tokio::spawn(read_pod(source, side, pod.to_string(), sender, token));
        true
    }

    pub fn detach(&mut self, side: Side) {
        self.lane_mut(side).detach();
    }

    pub fn shutdown(&mut self) {
        self.old.detach();
        self.new.detach();
    }

    /// 次のイベントを待つ（キャンセルしても取りこぼさない）
    pub async fn recv(&mut self) -> LogEvent {
        let (side, result) = tokio::select! {
            result = self.old.receiver.recv() => (Side::Old, result),
            result = self.new.receiver.recv() => (Side::New, result),
        };

        match result {
            Ok(event) => {
                if let LogEvent::Ended { pod, .. } = &event {
                    let lane = self.lane_mut(side);
                    if lane.attached.as_ref().is_some_and(|(p, _)| p == pod) {
                        lane.attached = None;
                    }
                }
                event
            }
            Err(RecvError::Lagged(count)) => LogEvent::Dropped { side, count },
            // 送信側は self が保持しているので閉じることはない
            Err(RecvError::Closed) => std::future::pending().await,
        }
    }
}

impl Drop for LogMultiplexer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn read_pod(
    source: Arc<dyn LogSource>,
    side: Side,
    pod: String,
    sender: broadcast::Sender<LogEvent>,
    cancel: CancellationToken,
) {
    let opened = tokio::select! {
        _ = cancel.cancelled() => return,
        opened = source.open(&pod) => opened,
    };
    let mut stream = match opened {
        Ok(stream) => stream,
        Err(e) => {
            let _ = sender.send(LogEvent::Ended {
                side,
                pod,
                error: Some(e),
            });
            return;
        }
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            next = stream.next() => match next {
                Some(Ok(raw)) => {
                    // 受信側がいない場合の失敗は無視してよい
                    let _ = sender.send(LogEvent::Line(parse_line(side, &pod, &raw)));
                }
                Some(Err(e)) => {
                    let _ = sender.send(LogEvent::Ended { side, pod, error: Some(e) });
                    return;
                }
                None => {
                    let _ = sender.send(LogEvent::Ended { side, pod, error: None });
                    return;
                }
            }
        }
    }
}
