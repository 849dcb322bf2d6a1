//! davit のデプロイエンジン
//!
//! 曖昧な入力の解決、マニフェストの書き換えと差分、ロールアウトの
//! ステートマシン、旧・新 Pod のログ多重化、失敗時の復元を提供する。

pub mod discovery;
pub mod error;
pub mod logmux;
pub mod model;
pub mod patch;
pub mod provider;
pub mod resolver;
pub mod revert;
pub mod rollout;

pub use discovery::*;
pub use error::*;
pub use logmux::*;
pub use model::*;
pub use patch::{PatchResult, patch};
pub use provider::*;
pub use resolver::*;
pub use revert::*;
pub use rollout::*;
