use crate::git::GitFinalizer;
use crate::interrupt::Interrupt;
use crate::prompt::Prompter;
use crate::render::{self, ConsoleObserver};
use chrono::Utc;
use clap::Args;
use colored::Colorize;
use davit_cluster::{KubeLogSource, KubeWatch, KubectlApplier, available_contexts, connect};
use davit_config::Settings;
use davit_core::{
    Axis, Candidate, ClusterError, Collaborators, CoreError, DeploymentIntent, Environment,
    ImageReference, PatchError, RegistryClient, ResolutionError, ResolveOutcome, RevertError,
    RolloutController, RunOutcome, Service, Target, discover_services, exit_code, find_tag, patch,
    resolve, snapshot, sort_newest_first,
};
use davit_registry::Gcloud;
use std::io::{self, IsTerminal, Stdout, StdinLock};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Args, Debug)]
pub struct DeployArgs {
    /// 環境名（部分一致可）
    #[arg(short, long)]
    pub env: Option<String>,

    /// サービス名（部分一致可）
    #[arg(short, long)]
    pub service: Option<String>,

    /// デプロイするイメージタグ
    #[arg(short, long)]
    pub tag: Option<String>,

    /// 差分を表示するだけで書き込み・適用はしない
    #[arg(long)]
    pub dry_run: bool,

    /// 確認を省略する（非対話モード）
    #[arg(short, long)]
    pub yes: bool,

    /// 保護された環境への確認として環境名を渡す
    #[arg(long, value_name = "ENV")]
    pub confirm_env: Option<String>,
}

/// 終了前に表示する致命的エラーと、その時点のフェーズ
#[derive(Debug)]
pub struct Failure {
    pub error: CoreError,
    pub phase: Option<String>,
}

impl Failure {
    fn before_apply(error: CoreError) -> Self {
        Self { error, phase: None }
    }
}

/// apply 直前まで準備が整った実行
struct Prepared {
    settings: Settings,
    intent: DeploymentIntent,
    token: davit_core::RevertToken,
    client: kube::Client,
    interrupt: Interrupt,
}

pub async fn handle(args: DeployArgs) -> Result<i32, Failure> {
    let prepared = match prepare(&args).await {
        Ok(Some(prepared)) => prepared,
        Ok(None) => return Ok(exit_code::SUCCESS),
        Err(e) => return Err(Failure::before_apply(e)),
    };
    rollout(prepared).await
}

/// 解決・イメージ選択・パッチ・確認・書き込みまで
async fn prepare(args: &DeployArgs) -> Result<Option<Prepared>, CoreError> {
    let settings = davit_config::load()?;
    let interactive = settings.defaults.interactive && !args.yes && io::stdin().is_terminal();
    tracing::debug!(interactive, "Loaded settings");

    let environments = settings.environments();
    let services = discover_all(&environments, &settings.registry.patterns);
    let Target {
        environment,
        service,
    } = resolve_target(args, &environments, &services, interactive)?;

    println!();
    println!("{}", "📦 デプロイ対象".bold());
    println!("  環境:     {}", environment.name.cyan());
    println!("  サービス: {}", service.name.cyan());
    println!("  ファイル: {}", service.relative_path.display());
    println!("  現在:     {}", service.current_image.dimmed());

    let current = ImageReference::parse(&service.current_image);
    let registry_path = current.repository.clone();

    let spinner = render::spinner(format!("{} のイメージを取得中...", registry_path));
    let listed = Gcloud::new(&settings.registry.command)
        .list_images(&registry_path)
        .await;
    spinner.finish_and_clear();
    let mut candidates = listed?;
    sort_newest_first(&mut candidates);
    if candidates.is_empty() {
        return Err(ResolutionError::NoCandidates { registry_path }.into());
    }

    let image = match &args.tag {
        Some(tag) => find_tag(&candidates, tag)
            .cloned()
            .ok_or_else(|| ResolutionError::TagNotFound {
                tag: tag.clone(),
                registry_path: registry_path.clone(),
            })?,
        None if interactive => {
            let labels = render::candidate_labels(&candidates, current.tag.as_deref(), Utc::now());
            match ask(|p| p.choose("デプロイするイメージを選択してください", &labels))? {
                Some(index) => candidates[index].clone(),
                None => return Err(ResolutionError::Declined.into()),
            }
        }
        None => return Err(ResolutionError::TagRequired.into()),
    };

    let intent = DeploymentIntent {
        environment,
        service,
        image,
        dry_run: args.dry_run,
    };
    let new_image = intent.new_image_reference();

    let mut token = snapshot(&intent.service.file_path)?;
    let original = std::str::from_utf8(token.original())
        .map_err(|e| PatchError::ParseFailure(e.to_string()))?
        .to_string();
    let patched = patch(&original, &intent.service.container, &new_image)?;

    if patched.is_noop() {
        println!();
        println!(
            "{}",
            format!("✓ 変更はありません（すでに {} です）", new_image).green()
        );
        return Ok(None);
    }

    println!();
    print!(
        "{}",
        render::format_diff(
            &intent.service.relative_path.display().to_string(),
            &patched.hunks
        )
    );

    if args.dry_run {
        println!();
        println!("{}", "dry-run: ファイルの書き込みとクラスタへの適用は行いません".yellow());
        return Ok(None);
    }

    confirm(args, &intent.environment, interactive)?;

    let context = intent.environment.cluster_context.clone();
    let client = connect(&context).await.map_err(with_context_hint)?;

    // 書き込み後の Ctrl+C は必ず復元を経由させる
    let interrupt = Interrupt::install().map_err(|source| RevertError::Write {
        path: token.path().to_path_buf(),
        source,
    })?;
    token.write_patched(patched.patched.as_bytes())?;
    tracing::info!(path = %token.path().display(), image = %new_image, "Wrote patched manifest");

    Ok(Some(Prepared {
        settings,
        intent,
        token,
        client,
        interrupt,
    }))
}

async fn rollout(prepared: Prepared) -> Result<i32, Failure> {
    let Prepared {
        settings,
        intent,
        token,
        client,
        interrupt,
    } = prepared;

    let namespace = intent.service.namespace_or_default().to_string();
    let new_image = intent.new_image_reference();
    let collaborators = Collaborators {
        applier: Arc::new(KubectlApplier::new(&intent.environment.cluster_context)),
        watch: Arc::new(KubeWatch::new(
            client.clone(),
            &namespace,
            intent.service.label_selector(),
            &intent.service.container,
            &new_image,
        )),
        logs: Arc::new(KubeLogSource::new(
            client,
            &namespace,
            &intent.service.container,
            settings.logs.tail_lines,
        )),
        audit: Arc::new(GitFinalizer::new()),
    };
    let controller = RolloutController::new(settings.rollout, settings.logs, collaborators);

    let cancel = CancellationToken::new();
    let listener = interrupt.cancel_on_signal(cancel.clone());

    let report = controller
        .run(&intent, token, cancel, &mut ConsoleObserver)
        .await;
    listener.abort();

    let phase = report
        .state
        .phase_history()
        .iter()
        .rev()
        .find(|p| !p.is_terminal())
        .map(|p| p.name().to_string());

    match report.outcome {
        RunOutcome::Succeeded { audit_warning } => {
            println!();
            println!(
                "{}",
                format!(
                    "✓ {} を {} にデプロイしました ({})",
                    intent.service.name, intent.environment.name, new_image
                )
                .green()
                .bold()
            );
            if let Some(warning) = audit_warning {
                eprintln!();
                eprintln!("{} {}", "⚠ 警告:".yellow().bold(), warning);
                eprintln!(
                    "  ヒント: {} は書き換えたままです。手動で commit / push してください",
                    intent.service.file_path.display()
                );
            }
            Ok(exit_code::SUCCESS)
        }
        RunOutcome::Aborted => {
            println!();
            println!(
                "{}",
                "中断しました。ローカルの変更は元に戻しました".yellow()
            );
            Ok(exit_code::ABORTED)
        }
        RunOutcome::Failed(e) => Err(Failure {
            error: e.into(),
            phase,
        }),
        RunOutcome::RevertFailed(e) => Err(Failure {
            error: e.into(),
            phase,
        }),
    }
}

fn discover_all(environments: &[Environment], patterns: &[String]) -> Vec<Service> {
    let mut services = Vec::new();
    for environment in environments {
        match discover_services(environment, patterns) {
            Ok(found) => services.extend(found),
            Err(e) => tracing::warn!(environment = %environment.name, error = %e, "Skipping service discovery for environment"),
        }
    }
    services
}

fn resolve_target(
    args: &DeployArgs,
    environments: &[Environment],
    services: &[Service],
    interactive: bool,
) -> Result<Target, CoreError> {
    let mut env_fragment = args.env.clone();
    let mut service_fragment = args.service.clone();

    loop {
        let outcome = resolve(
            environments,
            env_fragment.as_deref(),
            services,
            service_fragment.as_deref(),
        );
        let chosen = match outcome {
            ResolveOutcome::NeedsConfirmation(candidate) if interactive => {
                let question = format!("{} '{}' のことですか？", candidate.axis, candidate);
                if !ask(|p| p.confirm(&question))? {
                    return Err(ResolutionError::Declined.into());
                }
                candidate
            }
            ResolveOutcome::NeedsChoice(candidates) if interactive => {
                let axis = candidates.first().map(|c| c.axis).unwrap_or(Axis::Service);
                let labels: Vec<String> = candidates.iter().map(|c| c.to_string()).collect();
                let title = format!("{}を選択してください", axis);
                match ask(|p| p.choose(&title, &labels))? {
                    Some(index) => candidates[index].clone(),
                    None => return Err(ResolutionError::Declined.into()),
                }
            }
            other => return Ok(other.into_target()?),
        };

        let value = Some(chosen.value().to_string());
        match chosen {
            Candidate {
                axis: Axis::Environment,
                ..
            } => env_fragment = value,
            Candidate {
                axis: Axis::Service,
                ..
            } => service_fragment = value,
        }
    }
}

/// 保護環境は環境名の入力、それ以外は y/N で確認する
fn confirm(args: &DeployArgs, environment: &Environment, interactive: bool) -> Result<(), CoreError> {
    if environment.protected {
        let typed = match (&args.confirm_env, interactive) {
            (Some(typed), _) => typed.clone(),
            (None, true) => {
                println!();
                println!(
                    "{}",
                    format!("⚠ '{}' は保護された環境です", environment.name)
                        .red()
                        .bold()
                );
                ask(|p| p.input(&format!("続行するには '{}' と入力してください", environment.name)))?
            }
            (None, false) => String::new(),
        };
        if !environment.accepts_confirmation(&typed) {
            return Err(ResolutionError::ProtectedNotConfirmed {
                environment: environment.name.clone(),
            }
            .into());
        }
        return Ok(());
    }

    if interactive {
        println!();
        if !ask(|p| p.confirm("この内容でデプロイしますか？"))? {
            return Err(ResolutionError::Declined.into());
        }
    }
    Ok(())
}

/// 標準入力でのプロンプト。入力が閉じた場合はキャンセル扱い
fn ask<T>(
    f: impl FnOnce(&mut Prompter<StdinLock<'static>, Stdout>) -> io::Result<T>,
) -> Result<T, CoreError> {
    f(&mut Prompter::stdio()).map_err(|e| {
        tracing::warn!(error = %e, "Failed to read prompt input");
        CoreError::from(ResolutionError::Declined)
    })
}

fn with_context_hint(error: ClusterError) -> ClusterError {
    match error {
        ClusterError::Client(message) => {
            let contexts = available_contexts();
            if contexts.is_empty() {
                ClusterError::Client(message)
            } else {
                ClusterError::Client(format!(
                    "{}\n\nヒント:\n  • 利用可能なコンテキスト: {}",
                    message,
                    contexts.join(", ")
                ))
            }
        }
        other => other,
    }
}
