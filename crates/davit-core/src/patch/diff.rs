//! 表示用の差分計算

use similar::{ChangeTag, TextDiff};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffTag {
    Equal,
    Delete,
    Insert,
}

impl From<ChangeTag> for DiffTag {
    fn from(tag: ChangeTag) -> Self {
        match tag {
            ChangeTag::Equal => DiffTag::Equal,
            ChangeTag::Delete => DiffTag::Delete,
            ChangeTag::Insert => DiffTag::Insert,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine {
    pub tag: DiffTag,
    /// 改行を除いた行内容
    pub text: String,
}

/// unified diff の1ハンク（行番号は1始まり）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffHunk {
    pub old_start: usize,
    pub old_len: usize,
    pub new_start: usize,
    pub new_len: usize,
    pub lines: Vec<DiffLine>,
}

impl DiffHunk {
    pub fn header(&self) -> String {
        format!(
            "@@ -{},{} +{},{} @@",
            self.old_start, self.old_len, self.new_start, self.new_len
        )
    }

    /// 変更前の行（Equal + Delete）
    pub fn before(&self) -> impl Iterator<Item = &str> {
        self.lines
            .iter()
            .filter(|l| l.tag != DiffTag::Insert)
            .map(|l| l.text.as_str())
    }

    /// 変更後の行（Equal + Insert）
    pub fn after(&self) -> impl Iterator<Item = &str> {
        self.lines
            .iter()
            .filter(|l| l.tag != DiffTag::Delete)
            .map(|l| l.text.as_str())
    }
}

/// 行単位の差分をハンクに分けて返す
pub fn diff_hunks(old: &str, new: &str, context: usize) -> Vec<DiffHunk> {
    let diff = TextDiff::from_lines(old, new);

    diff.grouped_ops(context)
        .into_iter()
        .filter_map(|group| {
            let first = group.first()?;
            let last = group.last()?;
            let old_range = first.old_range().start..last.old_range().end;
            let new_range = first.new_range().start..last.new_range().end;

            let lines = group
                .iter()
                .flat_map(|op| diff.iter_changes(op))
                .map(|change| DiffLine {
                    tag: change.tag().into(),
                    text: change.value().trim_end_matches(['\n', '\r']).to_string(),
                })
                .collect();

            Some(DiffHunk {
                old_start: old_range.start + 1,
                old_len: old_range.len(),
                new_start: new_range.start + 1,
                new_len: new_range.len(),
                lines,
            })
        })
        .collect()
}
