//! 端末への表示

use chrono::{DateTime, Utc};
use colored::Colorize;
use davit_core::patch::{DiffHunk, DiffTag};
use davit_core::{
    CoreError, ImageCandidate, LogEvent, LogLine, PodState, RolloutObserver, RolloutPhase, Side,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// 差分を色付きの unified 形式で組み立てる
pub fn format_diff(label: &str, hunks: &[DiffHunk]) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n", format!("--- {}", label).red()));
    out.push_str(&format!("{}\n", format!("+++ {}", label).green()));
    for hunk in hunks {
        out.push_str(&format!("{}\n", hunk.header().cyan()));
        for line in &hunk.lines {
            let text = line.text.trim_end_matches(['\r', '\n']);
            let rendered = match line.tag {
                DiffTag::Delete => format!("-{}", text).red().to_string(),
                DiffTag::Insert => format!("+{}", text).green().to_string(),
                DiffTag::Equal => format!(" {}", text).dimmed().to_string(),
            };
            out.push_str(&rendered);
            out.push('\n');
        }
    }
    out
}

/// イメージ候補の選択肢（タグ、短縮ダイジェスト、経過時間）
pub fn candidate_labels(
    candidates: &[ImageCandidate],
    current_tag: Option<&str>,
    now: DateTime<Utc>,
) -> Vec<String> {
    candidates
        .iter()
        .map(|c| {
            let current = if current_tag == Some(c.tag.as_str()) {
                format!(" {}", "(現在)".yellow())
            } else {
                String::new()
            };
            format!(
                "{:<24} {}  {}{}",
                c.tag,
                c.digest.dimmed(),
                c.age_at(now).dimmed(),
                current
            )
        })
        .collect()
}

pub fn format_log_line(line: &LogLine) -> String {
    let side = match line.side {
        Side::Old => "old".yellow(),
        Side::New => "new".green(),
    };
    let time = line
        .timestamp
        .map(|t| format!("{} ", t.format("%H:%M:%S")))
        .unwrap_or_default();
    let level = match line.level.as_deref() {
        Some(level @ ("ERROR" | "CRITICAL" | "ALERT" | "EMERGENCY")) => {
            format!("{} ", level.red().bold())
        }
        Some(level @ ("WARN" | "WARNING")) => format!("{} ", level.yellow()),
        Some(level) => format!("{} ", level.dimmed()),
        None => String::new(),
    };
    format!(
        "[{}] {} {}{}{}",
        side,
        line.pod.dimmed(),
        time.dimmed(),
        level,
        line.message
    )
}

fn pod_state_label(state: PodState) -> String {
    let label = state.to_string();
    match state {
        PodState::Ready => label.green().to_string(),
        PodState::Crashed => label.red().bold().to_string(),
        PodState::Gone | PodState::Terminating => label.dimmed().to_string(),
        PodState::Pending | PodState::Running => label.yellow().to_string(),
    }
}

/// 待ち時間のあるリモート呼び出し用のスピナー
pub fn spinner(message: impl Into<String>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
        .template("{spinner:.cyan} {msg}")
    {
        pb.set_style(style);
    }
    pb.set_message(message.into());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// 致命的エラーの表示（原因・最後のフェーズ）
pub fn print_fatal(error: &CoreError, phase: Option<&str>) {
    eprintln!();
    eprintln!("{} [{}]", "✗ デプロイを完了できませんでした".red().bold(), error.kind());
    eprintln!("{}", error);
    eprintln!(
        "{} {}",
        "最後のフェーズ:".dimmed(),
        phase.unwrap_or("(apply 前)")
    );
}

/// ロールアウトの進行を stdout に表示する
pub struct ConsoleObserver;

impl RolloutObserver for ConsoleObserver {
    fn phase_changed(&mut self, phase: &RolloutPhase) {
        let label = match phase {
            RolloutPhase::Applying => "【Applying】マニフェストを適用中...".blue().bold(),
            RolloutPhase::Watching => "【Watching】ロールアウトを監視中... (Ctrl+C で中断)"
                .blue()
                .bold(),
            RolloutPhase::Succeeded => "【Succeeded】ロールアウトが完了しました".green().bold(),
            RolloutPhase::Failed(_) => "【Failed】ロールアウトに失敗しました".red().bold(),
            RolloutPhase::Aborted => "【Aborted】中断しました".yellow().bold(),
        };
        println!();
        println!("{}", label);
    }

    fn pod_changed(&mut self, side: Side, pod: &str, state: PodState) {
        let side = match side {
            Side::Old => "old".yellow(),
            Side::New => "new".green(),
        };
        println!("  ● [{}] {} {}", side, pod.cyan(), pod_state_label(state));
    }

    fn log(&mut self, event: &LogEvent) {
        match event {
            LogEvent::Line(line) => println!("    {}", format_log_line(line)),
            LogEvent::Dropped { side, count } => println!(
                "    {}",
                format!("[{}] … {} 行のログを省略しました", side, count).dimmed()
            ),
            LogEvent::Ended {
                side,
                pod,
                error: Some(e),
            } => println!(
                "    {}",
                format!("[{}] {} のログが途切れました: {}", side, pod, e).yellow()
            ),
            LogEvent::Ended { .. } => {}
        }
    }
}
