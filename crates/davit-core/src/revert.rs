//! パッチ前のファイル内容を保持し、失敗・中断時に元へ戻す

use crate::error::RevertError;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// トークンの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// スナップショット取得済み、まだ書き込んでいない
    Captured,
    /// パッチ済みの内容をディスクに書き込んだ
    Applied,
    /// 元の内容に戻した
    Restored,
    /// 監査完了により破棄された（パッチ済みの内容を正とする）
    Discarded,
}

/// パッチ対象ファイルの復元トークン
///
/// 1回の実行につき1つだけ存在し、その間は復元の唯一の権限を持つ。
/// 書き込み後に `discard` / `keep_patched` されずに破棄された場合は
/// Drop で元の内容へ戻す。
#[derive(Debug)]
pub struct RevertToken {
    path: PathBuf,
    original: Vec<u8>,
    state: TokenState,
}

/// ファイルの現在の内容を記録する
pub fn snapshot(path: impl AsRef<Path>) -> Result<RevertToken, RevertError> {
    let path = path.as_ref().to_path_buf();
    let original = fs::read(&path).map_err(|source| RevertError::Snapshot {
        path: path.clone(),
        source,
    })?;
    debug!(path = %path.display(), bytes = original.len(), "Captured snapshot");
    Ok(RevertToken {
        path,
        original,
        state: TokenState::Captured,
    })
}

impl RevertToken {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn original(&self) -> &[u8] {
        &self.original
    }

    pub fn state(&self) -> TokenState {
        self.state
    }

    /// ディスク上のファイルが書き換わっているか
    pub fn is_applied(&self) -> bool {
        self.state == TokenState::Applied
    }

    /// パッチ済みの内容を書き込む
    ///
    /// 同じディレクトリの一時ファイルに書いてからリネームするため、
    /// 割り込まれても「全く書かれていない」か「全て書かれた」のどちらかになる。
    pub fn write_patched(&mut self, patched: &[u8]) -> Result<(), RevertError> {
        write_atomic(&self.path, patched).map_err(|source| RevertError::Write {
            path: self.path.clone(),
            source,
        })?;
        self.state = TokenState::Applied;
        info!(path = %self.path.display(), "Wrote patched manifest");
        Ok(())
    }

    /// 元の内容をそのまま書き戻す
    ///
    /// 同期的に実行され、何度呼んでも結果は同じ。書き込み前や
    /// 復元済みの場合は何もしない。
    pub fn restore(&mut self) -> Result<(), RevertError> {
        match self.state {
            TokenState::Applied => {}
            TokenState::Captured | TokenState::Restored | TokenState::Discarded => {
                return Ok(());
            }
        }

        write_atomic(&self.path, &self.original).map_err(|source| RevertError::Restore {
            path: self.path.clone(),
            original: String::from_utf8_lossy(&self.original).into_owned(),
            source,
        })?;
        self.state = TokenState::Restored;
        info!(path = %self.path.display(), "Restored original manifest");
        Ok(())
    }

    /// 監査コミット成功後にトークンを破棄する
    pub fn discard(mut self) {
        debug!(path = %self.path.display(), "Discarding revert token");
        self.state = TokenState::Discarded;
    }

    /// 復元せずに手放す（クラスタには反映済みで、監査だけが失敗した場合）
    pub fn keep_patched(mut self) {
        debug!(path = %self.path.display(), "Keeping patched manifest on disk");
        self.state = TokenState::Discarded;
    }
}

impl Drop for RevertToken {
    fn drop(&mut self) {
        if self.state != TokenState::Applied {
            return;
        }
        if let Err(e) = self.restore() {
            error!(error = %e, "Failed to restore manifest while unwinding");
        }
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;
    if let Ok(metadata) = fs::metadata(path) {
        fs::set_permissions(temp.path(), metadata.permissions())?;
    }
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
