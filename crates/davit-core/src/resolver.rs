//! 曖昧な入力からデプロイ対象を一意に決定する
//!
//! 環境名とサービス名のそれぞれについて、次の順で照合する:
//!
//! 1. 大文字小文字を区別した完全一致 → 確定
//! 2. 大文字小文字を無視した部分一致が1件 → 確認が必要
//! 3. 部分一致が2件以上 → 名前順の候補から選択が必要
//! 4. 一致なし → 見つからない
//!
//! 同じサービス名が複数の環境・ファイルに存在する場合は、修飾名付きの
//! 候補として選択を求め、黙って一方を選ぶことはしない。

use crate::error::ResolutionError;
use crate::model::{Environment, Service};
use std::collections::BTreeSet;
use std::fmt;

/// 照合する名前空間
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Environment,
    Service,
}

impl Axis {
    /// 対応する CLI フラグ名
    pub fn flag(&self) -> &'static str {
        match self {
            Axis::Environment => "env",
            Axis::Service => "service",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Environment => write!(f, "環境"),
            Axis::Service => write!(f, "サービス"),
        }
    }
}

/// 1つの名前空間での照合結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameMatch {
    Exact(String),
    Single(String),
    Multiple(Vec<String>),
    None,
}

/// 名前の集合に対して断片を照合する
///
/// 重複した名前は1つとして扱う。`Multiple` は名前順。
pub fn match_name<'a, I>(names: I, fragment: &str) -> NameMatch
where
    I: IntoIterator<Item = &'a str>,
{
    let names: BTreeSet<&str> = names.into_iter().collect();

    if names.contains(fragment) {
        return NameMatch::Exact(fragment.to_string());
    }

    let needle = fragment.to_lowercase();
    let mut matches: Vec<String> = names
        .into_iter()
        .filter(|name| name.to_lowercase().contains(&needle))
        .map(str::to_string)
        .collect();

    match matches.len() {
        0 => NameMatch::None,
        1 => NameMatch::Single(matches.remove(0)),
        _ => NameMatch::Multiple(matches),
    }
}

/// 確認・選択のために呼び出し側へ提示する候補
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub axis: Axis,
    pub name: String,
    /// 同名サービスを区別する修飾名
    pub qualifier: Option<String>,
}

impl Candidate {
    fn environment(name: &str) -> Self {
        Self {
            axis: Axis::Environment,
            name: name.to_string(),
            qualifier: None,
        }
    }

    fn service(name: &str) -> Self {
        Self {
            axis: Axis::Service,
            name: name.to_string(),
            qualifier: None,
        }
    }

    /// 確定後に次の照合へ渡す値（完全一致するもの）
    pub fn value(&self) -> &str {
        self.qualifier.as_deref().unwrap_or(&self.name)
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(q) => write!(f, "{} ({})", self.name, q),
            None => write!(f, "{}", self.name),
        }
    }
}

/// 確定したデプロイ対象
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub environment: Environment,
    pub service: Service,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    Unique(Target),
    NeedsConfirmation(Candidate),
    NeedsChoice(Vec<Candidate>),
    NotFound {
        axis: Axis,
        fragment: String,
        available: Vec<String>,
    },
}

impl ResolveOutcome {
    /// 非対話モード用: 一意に決まらない場合はエラーにする
    pub fn into_target(self) -> Result<Target, ResolutionError> {
        match self {
            ResolveOutcome::Unique(target) => Ok(target),
            ResolveOutcome::NeedsConfirmation(candidate) => Err(ResolutionError::Unconfirmed {
                axis: candidate.axis,
                candidate: candidate.value().to_string(),
            }),
            ResolveOutcome::NeedsChoice(candidates) => Err(ResolutionError::Ambiguous {
                axis: candidates
                    .first()
                    .map(|c| c.axis)
                    .unwrap_or(Axis::Service),
                candidates: candidates
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
            ResolveOutcome::NotFound {
                axis,
                fragment,
                available,
            } => Err(ResolutionError::NotFound {
                axis,
                fragment,
                available: available.join(", "),
            }),
        }
    }
}

/// 環境とサービスの断片からデプロイ対象を解決する
///
/// 副作用はなく、与えられた一覧だけを参照する。断片が `None` の場合は
/// 空文字列として扱うため、全件が部分一致の候補になる。
/// 確認・選択が終わったら `Candidate::value` を断片として再度呼び出す。
pub fn resolve(
    environments: &[Environment],
    env_fragment: Option<&str>,
    services: &[Service],
    service_fragment: Option<&str>,
) -> ResolveOutcome {
    let env_fragment = env_fragment.unwrap_or("");
    let service_fragment = service_fragment.unwrap_or("");

    let env_match = match_name(environments.iter().map(|e| e.name.as_str()), env_fragment);
    let env_scope: Vec<&str> = match &env_match {
        NameMatch::Exact(name) | NameMatch::Single(name) => vec![name.as_str()],
        NameMatch::Multiple(names) => names.iter().map(String::as_str).collect(),
        NameMatch::None => {
            return ResolveOutcome::NotFound {
                axis: Axis::Environment,
                fragment: env_fragment.to_string(),
                available: sorted_names(environments.iter().map(|e| e.name.as_str())),
            };
        }
    };

    let in_scope: Vec<&Service> = services
        .iter()
        .filter(|s| env_scope.contains(&s.environment.as_str()))
        .collect();

    // 修飾名での指定は環境も含めて一意に決まる
    if let Some(service) = in_scope
        .iter()
        .find(|s| s.qualified_name() == service_fragment)
        && let Some(environment) = environments.iter().find(|e| e.name == service.environment)
    {
        return ResolveOutcome::Unique(Target {
            environment: environment.clone(),
            service: (*service).clone(),
        });
    }

    let service_name = match match_name(in_scope.iter().map(|s| s.name.as_str()), service_fragment)
    {
        NameMatch::Exact(name) => name,
        NameMatch::Single(name) => {
            return ResolveOutcome::NeedsConfirmation(Candidate::service(&name));
        }
        NameMatch::Multiple(names) => {
            return ResolveOutcome::NeedsChoice(
                names.iter().map(|n| Candidate::service(n)).collect(),
            );
        }
        NameMatch::None => {
            return ResolveOutcome::NotFound {
                axis: Axis::Service,
                fragment: service_fragment.to_string(),
                available: sorted_names(in_scope.iter().map(|s| s.name.as_str())),
            };
        }
    };

    let environment_name = match env_match {
        NameMatch::Exact(name) => name,
        NameMatch::Single(name) => {
            return ResolveOutcome::NeedsConfirmation(Candidate::environment(&name));
        }
        NameMatch::Multiple(_) | NameMatch::None => {
            // サービスが存在する環境だけに絞って確認・選択を求める
            let hosting: BTreeSet<&str> = in_scope
                .iter()
                .filter(|s| s.name == service_name)
                .map(|s| s.environment.as_str())
                .collect();
            let mut hosting: Vec<Candidate> =
                hosting.into_iter().map(Candidate::environment).collect();
            return if hosting.len() == 1 {
                ResolveOutcome::NeedsConfirmation(hosting.remove(0))
            } else {
                ResolveOutcome::NeedsChoice(hosting)
            };
        }
    };

    let mut records: Vec<&Service> = in_scope
        .into_iter()
        .filter(|s| s.environment == environment_name && s.name == service_name)
        .collect();

    if records.len() == 1 {
        let service = records.remove(0).clone();
        let environment = environments
            .iter()
            .find(|e| e.name == environment_name)
            .cloned();
        if let Some(environment) = environment {
            return ResolveOutcome::Unique(Target {
                environment,
                service,
            });
        }
    }

    // 同一環境内の名前衝突（別ファイル・別 namespace）
    records.sort_by_key(|s| s.qualified_name());
    ResolveOutcome::NeedsChoice(
        records
            .into_iter()
            .map(|s| Candidate {
                axis: Axis::Service,
                name: s.name.clone(),
                qualifier: Some(s.qualified_name()),
            })
            .collect(),
    )
}

fn sorted_names<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    names
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect()
}
