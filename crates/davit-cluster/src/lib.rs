//! davit の Kubernetes 連携
//!
//! - `kubectl apply` によるマニフェストの適用
//! - `kube` の watcher による Pod イベントの監視
//! - Pod ログのストリーミング

pub mod client;
pub mod kubectl;
pub mod logs;
pub mod watch;

pub use client::*;
pub use kubectl::*;
pub use logs::*;
pub use watch::*;
