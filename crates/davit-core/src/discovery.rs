//! サービス自動発見
//!
//! 環境の YAML ルート配下 (`**/*.yaml`, `**/*.yml`) を走査し、
//! レジストリのイメージを参照しているコンテナをサービスとして列挙します。

use crate::error::{CoreError, Result};
use crate::model::{Environment, Service};
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// ワークロード内で見つかったコンテナ
struct FoundContainer {
    name: String,
    image: String,
}

/// 環境の YAML ルートからサービスを発見する
///
/// `registry_patterns` のいずれかを含むイメージを持つコンテナが対象。
/// パースできないファイルは警告を出して読み飛ばす。
#[tracing::instrument(skip(environment), fields(environment = %environment.name))]
pub fn discover_services(
    environment: &Environment,
    registry_patterns: &[String],
) -> Result<Vec<Service>> {
    let root = &environment.yaml_root_dir;
    if !root.is_dir() {
        return Err(CoreError::Config(format!(
            "環境 '{}' の YAML ルートが存在しません: {}",
            environment.name,
            root.display()
        )));
    }

    let mut services = Vec::new();
    for path in find_yaml_files(root)? {
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable YAML file");
                continue;
            }
        };

        match services_in_file(environment, root, &path, &content, registry_patterns) {
            Ok(found) => {
                debug!(path = %path.display(), count = found.len(), "Scanned YAML file");
                services.extend(found);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unparseable YAML file");
            }
        }
    }

    services.sort_by(|a, b| {
        a.name
            .cmp(&b.name)
            .then_with(|| a.relative_path.cmp(&b.relative_path))
    });
    info!(count = services.len(), "Discovered services");
    Ok(services)
}

fn find_yaml_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for extension in ["yaml", "yml"] {
        let pattern = format!("{}/**/*.{}", root.display(), extension);
        let paths = glob::glob(&pattern)
            .map_err(|e| CoreError::Config(format!("不正な検索パターン {}: {}", pattern, e)))?;
        files.extend(paths.filter_map(|entry| entry.ok()).filter(|p| p.is_file()));
    }
    files.sort();
    Ok(files)
}

fn services_in_file(
    environment: &Environment,
    root: &Path,
    path: &Path,
    content: &str,
    registry_patterns: &[String],
) -> std::result::Result<Vec<Service>, serde_yaml::Error> {
    let relative_path = path.strip_prefix(root).unwrap_or(path).to_path_buf();
    let mut services = Vec::new();

    for document in serde_yaml::Deserializer::from_str(content) {
        let value = Value::deserialize(document)?;
        let Some(workload) = value
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
        else {
            continue;
        };

        let mut containers = Vec::new();
        collect_containers(&value, &mut containers);
        let targets: Vec<_> = containers
            .into_iter()
            .filter(|c| registry_patterns.iter().any(|p| c.image.contains(p.as_str())))
            .collect();

        let namespace = value
            .get("metadata")
            .and_then(|m| m.get("namespace"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let selector = match_labels(&value);
        let several = targets.len() > 1;

        for container in targets {
            let name = if several {
                format!("{}/{}", workload, container.name)
            } else {
                workload.to_string()
            };
            services.push(Service {
                name,
                environment: environment.name.clone(),
                file_path: path.to_path_buf(),
                relative_path: relative_path.clone(),
                container: container.name,
                current_image: container.image,
                workload: workload.to_string(),
                namespace: namespace.clone(),
                selector: selector.clone(),
            });
        }
    }

    Ok(services)
}

/// `containers` 配下の name/image を再帰的に集める（initContainers は対象外）
fn collect_containers(value: &Value, out: &mut Vec<FoundContainer>) {
    match value {
        Value::Mapping(map) => {
            for (key, child) in map {
                if key.as_str() == Some("containers")
                    && let Value::Sequence(items) = child
                {
                    for item in items {
                        let name = item.get("name").and_then(Value::as_str);
                        let image = item.get("image").and_then(Value::as_str);
                        if let (Some(name), Some(image)) = (name, image) {
                            out.push(FoundContainer {
                                name: name.to_string(),
                                image: image.to_string(),
                            });
                        }
                    }
                } else {
                    collect_containers(child, out);
                }
            }
        }
        Value::Sequence(items) => {
            for item in items {
                collect_containers(item, out);
            }
        }
        Value::Tagged(tagged) => collect_containers(&tagged.value, out),
        _ => {}
    }
}

fn match_labels(value: &Value) -> BTreeMap<String, String> {
    value
        .get("spec")
        .and_then(|s| s.get("selector"))
        .and_then(|s| s.get("matchLabels"))
        .and_then(Value::as_mapping)
        .map(|labels| {
            labels
                .iter()
                .filter_map(|(k, v)| Some((k.as_str()?.to_string(), scalar_to_string(v)?)))
                .collect()
        })
        .unwrap_or_default()
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
