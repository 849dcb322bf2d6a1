//! マニフェストのイメージ書き換え
//!
//! 対象コンテナの `image` の値だけを差し替え、それ以外のバイト列
//! （コメント、キー順序、引用符、他のコンテナ）はそのまま残す。

pub mod diff;
mod locate;

use serde::Deserialize;
use serde_yaml::Value;
use tracing::debug;

use crate::error::PatchError;

pub use diff::{DiffHunk, DiffLine, DiffTag, diff_hunks};

/// 差分表示で使う前後の文脈行数
pub const DIFF_CONTEXT: usize = 3;

/// パッチ結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchResult {
    pub original: String,
    pub patched: String,
    pub hunks: Vec<DiffHunk>,
    pub old_image: String,
    pub new_image: String,
}

impl PatchResult {
    /// 書き換えても内容が変わらない場合
    pub fn is_noop(&self) -> bool {
        self.original == self.patched
    }
}

/// `container` の image を `new_image` に置き換えたテキストを作る
pub fn patch(original: &str, container: &str, new_image: &str) -> Result<PatchResult, PatchError> {
    let count = count_containers(original, container)?;
    match count {
        0 => {
            return Err(PatchError::TargetNotFound {
                container: container.to_string(),
            });
        }
        1 => {}
        count => {
            return Err(PatchError::AmbiguousTarget {
                container: container.to_string(),
                count,
            });
        }
    }

    let ranges = locate::locate_image_values(original, container);
    let [range] = ranges.as_slice() else {
        return Err(PatchError::ImageFieldNotLocated {
            container: container.to_string(),
        });
    };

    let old_image = original[range.clone()].to_string();
    let mut patched = String::with_capacity(original.len() + new_image.len());
    patched.push_str(&original[..range.start]);
    patched.push_str(new_image);
    patched.push_str(&original[range.end..]);

    debug!(
        container = %container,
        old_image = %old_image,
        new_image = %new_image,
        "Rewrote container image"
    );

    let hunks = diff_hunks(original, &patched, DIFF_CONTEXT);
    Ok(PatchResult {
        original: original.to_string(),
        patched,
        hunks,
        old_image,
        new_image: new_image.to_string(),
    })
}

/// 全ドキュメントを構造的に読み、`containers` 配下で名前が一致する項目を数える
fn count_containers(source: &str, container: &str) -> Result<usize, PatchError> {
    let mut count = 0;
    for document in serde_yaml::Deserializer::from_str(source) {
        let value = Value::deserialize(document)
            .map_err(|e| PatchError::ParseFailure(e.to_string()))?;
        count += count_in_value(&value, container);
    }
    Ok(count)
}

fn count_in_value(value: &Value, container: &str) -> usize {
    match value {
        Value::Mapping(map) => map
            .iter()
            .map(|(key, child)| {
                let here = match (key.as_str(), child) {
                    (Some("containers"), Value::Sequence(items)) => items
                        .iter()
                        .filter(|item| {
                            item.get("name").and_then(Value::as_str) == Some(container)
                        })
                        .count(),
                    _ => 0,
                };
                here + count_in_value(child, container)
            })
            .sum(),
        Value::Sequence(items) => items.iter().map(|item| count_in_value(item, container)).sum(),
        Value::Tagged(tagged) => count_in_value(&tagged.value, container),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEPLOYMENT: &str = r#"# payment deployment
apiVersion: apps/v1
kind: Deployment
metadata:
  name: payment-service
  namespace: prod
spec:
  replicas: 2
  template:
    spec:
      containers:
        - name: payment-service
          # application image
          image: gcr.io/acme/payment-service:v1.4.0
          ports:
            - containerPort: 8080
          env:
            - name: istio-proxy
              value: "disabled"
        - name: istio-proxy
          image: docker.io/istio/proxyv2:1.20.0
"#;

    #[test]
    fn test_patch_only_target_image_line_changes() {
        let result = patch(
            DEPLOYMENT,
            "payment-service",
            "gcr.io/acme/payment-service:v1.5.0",
        )
        .unwrap();

        assert_eq!(result.old_image, "gcr.io/acme/payment-service:v1.4.0");
        let changed: Vec<_> = DEPLOYMENT
            .lines()
            .zip(result.patched.lines())
            .filter(|(a, b)| a != b)
            .collect();
        assert_eq!(
            changed,
            vec![(
                "          image: gcr.io/acme/payment-service:v1.4.0",
                "          image: gcr.io/acme/payment-service:v1.5.0"
            )]
        );
        assert!(result.patched.contains("image: docker.io/istio/proxyv2:1.20.0"));
        assert!(result.patched.contains("# application image"));
        assert_eq!(result.hunks.len(), 1);
    }

    #[test]
    fn test_patch_sidecar_leaves_primary_untouched() {
        let result = patch(DEPLOYMENT, "istio-proxy", "docker.io/istio/proxyv2:1.21.0").unwrap();
        assert!(
            result
                .patched
                .contains("image: gcr.io/acme/payment-service:v1.4.0")
        );
        assert!(result.patched.contains("image: docker.io/istio/proxyv2:1.21.0"));
    }

    #[test]
    fn test_patch_is_idempotent() {
        let once = patch(DEPLOYMENT, "payment-service", "gcr.io/acme/payment-service:v2").unwrap();
        let twice = patch(&once.patched, "payment-service", "gcr.io/acme/payment-service:v2").unwrap();
        assert!(twice.is_noop());
        assert!(twice.hunks.is_empty());
        assert_eq!(once.patched, twice.patched);
    }

    #[test]
    fn test_patch_preserves_quotes() {
        let source = "containers:\n  - name: web\n    image: \"nginx:1.25\" # pinned\n";
        let result = patch(source, "web", "nginx:1.26").unwrap();
        assert_eq!(
            result.patched,
            "containers:\n  - name: web\n    image: \"nginx:1.26\" # pinned\n"
        );
    }

    #[test]
    fn test_patch_multi_document() {
        let source = "kind: Service\nmetadata:\n  name: web\n---\nkind: Deployment\nspec:\n  template:\n    spec:\n      containers:\n      - name: web\n        image: nginx:1\n";
        let result = patch(source, "web", "nginx:2").unwrap();
        assert!(result.patched.ends_with("image: nginx:2\n"));
        assert!(result.patched.starts_with("kind: Service\n"));
    }

    #[test]
    fn test_patch_target_not_found() {
        let err = patch(DEPLOYMENT, "worker", "x:1").unwrap_err();
        assert_eq!(
            err,
            PatchError::TargetNotFound {
                container: "worker".into()
            }
        );
    }

    #[test]
    fn test_patch_ambiguous_target() {
        let source = "containers:\n  - name: web\n    image: a:1\n---\ncontainers:\n  - name: web\n    image: b:1\n";
        let err = patch(source, "web", "c:1").unwrap_err();
        assert_eq!(
            err,
            PatchError::AmbiguousTarget {
                container: "web".into(),
                count: 2
            }
        );
    }

    #[test]
    fn test_patch_parse_failure() {
        let err = patch("containers: [\n  - name: web", "web", "c:1").unwrap_err();
        assert!(matches!(err, PatchError::ParseFailure(_)));
    }

    #[test]
    fn test_patch_flow_style_not_located() {
        let source = "containers: [{name: web, image: a:1}]\n";
        let err = patch(source, "web", "c:1").unwrap_err();
        assert_eq!(
            err,
            PatchError::ImageFieldNotLocated {
                container: "web".into()
            }
        );
    }

    #[test]
    fn test_patch_preserves_crlf() {
        let source = "containers:\r\n  - name: web\r\n    image: a:1\r\n";
        let result = patch(source, "web", "a:2").unwrap();
        assert_eq!(result.patched, "containers:\r\n  - name: web\r\n    image: a:2\r\n");
    }
}
