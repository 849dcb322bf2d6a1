mod commands;
mod git;
mod interrupt;
mod prompt;
mod render;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "davit")]
#[command(about = "レジストリのイメージを Kubernetes へ、安全に。", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// イメージを選んでデプロイ（未指定の項目は対話で決定）
    Deploy(commands::deploy::DeployArgs),
    /// 設定ファイルの操作
    #[command(subcommand)]
    Config(ConfigCommands),
    /// バージョン情報を表示
    Version,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// 読み込んだ設定を表示
    Show,
    /// 設定ファイルのパスを表示
    Path,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // ログは stderr に出力（stdout の表示と混ざらないように）
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let code = match cli.command {
        Commands::Version => {
            println!("davit {}", env!("CARGO_PKG_VERSION"));
            davit_core::exit_code::SUCCESS
        }
        Commands::Config(ConfigCommands::Path) => report(commands::config::handle_path()),
        Commands::Config(ConfigCommands::Show) => report(commands::config::handle_show()),
        Commands::Deploy(args) => match commands::deploy::handle(args).await {
            Ok(code) => code,
            Err(failure) => {
                render::print_fatal(&failure.error, failure.phase.as_deref());
                failure.error.exit_code()
            }
        },
    };

    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn report(result: anyhow::Result<()>) -> i32 {
    match result {
        Ok(()) => davit_core::exit_code::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "エラー:".red().bold(), e);
            davit_core::exit_code::FAILED
        }
    }
}
