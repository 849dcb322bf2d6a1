//! 行単位の対話プロンプト

use colored::Colorize;
use std::io::{self, BufRead, Stdout, StdinLock, Write};

const MAX_ATTEMPTS: usize = 3;

pub struct Prompter<R, W> {
    input: R,
    output: W,
}

impl Prompter<StdinLock<'static>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn read_line(&mut self) -> io::Result<String> {
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "入力が終了しました",
            ));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// `[y/N]` 形式の確認。y / yes 以外は拒否
    pub fn confirm(&mut self, question: &str) -> io::Result<bool> {
        write!(self.output, "{} [y/N]: ", question)?;
        let answer = self.read_line()?;
        let answer = answer.trim();
        Ok(answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes"))
    }

    /// 番号付きの一覧から1つ選ぶ。空入力や `q` は None
    pub fn choose(&mut self, title: &str, items: &[String]) -> io::Result<Option<usize>> {
        writeln!(self.output, "{}", title.bold())?;
        for (i, item) in items.iter().enumerate() {
            writeln!(self.output, "  {:>3}) {}", (i + 1).to_string().cyan(), item)?;
        }

        for _ in 0..MAX_ATTEMPTS {
            write!(self.output, "番号を入力してください [1-{}, q で中止]: ", items.len())?;
            let answer = self.read_line()?;
            let answer = answer.trim();
            if answer.is_empty() || answer.eq_ignore_ascii_case("q") {
                return Ok(None);
            }
            match answer.parse::<usize>() {
                Ok(n) if (1..=items.len()).contains(&n) => return Ok(Some(n - 1)),
                _ => writeln!(self.output, "{}", "無効な番号です".yellow())?,
            }
        }
        Ok(None)
    }

    /// 自由入力（前後の空白はそのまま返す）
    pub fn input(&mut self, question: &str) -> io::Result<String> {
        write!(self.output, "{}: ", question)?;
        self.read_line()
    }
}
