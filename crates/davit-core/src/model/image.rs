//! イメージ参照とレジストリ候補

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// `registry[:port]/path[:tag][@digest]` 形式のイメージ参照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// タグ・ダイジェストを除いたリポジトリパス
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    pub fn parse(image: &str) -> Self {
        let image = image.trim();
        let (name, digest) = match image.split_once('@') {
            Some((name, digest)) => (name, Some(digest.to_string())),
            None => (image, None),
        };

        // ':' が最後の '/' より後ろにある場合のみタグとみなす（localhost:5000/app 対策）
        let last_slash = name.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (repository, tag) = match name[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                (&name[..split], Some(name[split + 1..].to_string()))
            }
            None => (name, None),
        };

        Self {
            repository: repository.to_string(),
            tag,
            digest,
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

/// レジストリから取得したデプロイ候補イメージ
///
/// 実行ごとに新しく取得され、永続化されない。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageCandidate {
    pub registry_path: String,
    pub tag: String,
    /// 短縮ダイジェスト（7文字）
    pub digest: String,
    pub updated_at: DateTime<Utc>,
}

impl ImageCandidate {
    /// パッチに使うイメージ参照
    pub fn image_reference(&self) -> String {
        format!("{}:{}", self.registry_path, self.tag)
    }

    /// 経過時間の表示文字列 ("3d ago" など)
    pub fn age_at(&self, now: DateTime<Utc>) -> String {
        let duration = now.signed_duration_since(self.updated_at);

        if duration.num_days() > 0 {
            format!("{}d ago", duration.num_days())
        } else if duration.num_hours() > 0 {
            format!("{}h ago", duration.num_hours())
        } else if duration.num_minutes() > 0 {
            format!("{}m ago", duration.num_minutes())
        } else {
            "just now".to_string()
        }
    }
}

/// `sha256:` 以降の先頭7文字を取り出す
pub fn short_digest(digest: &str) -> String {
    let hash = digest.rsplit('@').next().unwrap_or(digest);
    hash.strip_prefix("sha256:")
        .and_then(|h| h.get(0..7))
        .unwrap_or("unknown")
        .to_string()
}

/// 更新日時の新しい順に並べ替える（同時刻はタグ名順）
pub fn sort_newest_first(candidates: &mut [ImageCandidate]) {
    candidates.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| a.tag.cmp(&b.tag))
    });
}

/// タグ名の完全一致で候補を探す
pub fn find_tag<'a>(candidates: &'a [ImageCandidate], tag: &str) -> Option<&'a ImageCandidate> {
    candidates.iter().find(|c| c.tag == tag)
}
