//! Ctrl+C をキャンセル要求に変換する

use std::io;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[cfg(unix)]
type Listener = tokio::signal::unix::Signal;
#[cfg(windows)]
type Listener = tokio::signal::windows::CtrlC;

/// 登録済みの割り込みハンドラ
///
/// 作成した時点で OS のハンドラが登録され、以降の Ctrl+C でプロセスは
/// 終了しなくなる。パッチを書き込む前に作成すること。
pub struct Interrupt {
    listener: Listener,
}

impl Interrupt {
    pub fn install() -> io::Result<Self> {
        #[cfg(unix)]
        let listener =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
        #[cfg(windows)]
        let listener = tokio::signal::windows::ctrl_c()?;
        Ok(Self { listener })
    }

    /// 割り込みを受けたら `cancel` をキャンセルするタスクを起動する
    pub fn cancel_on_signal(mut self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            if self.listener.recv().await.is_some() {
                tracing::info!("Interrupt received, cancelling rollout");
                cancel.cancel();
            }
        })
    }
}
