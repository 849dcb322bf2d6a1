//! davit のイメージレジストリ連携
//!
//! `gcloud artifacts docker images list` の出力をデプロイ候補に変換する。

pub mod gcloud;

pub use gcloud::*;
