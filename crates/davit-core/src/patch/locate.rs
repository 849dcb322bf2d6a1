//! コメントや書式を保ったまま image フィールドの位置を特定する
//!
//! serde_yaml は位置情報を返さないため、構造的な検証は mod.rs で行い、
//! ここではブロック形式の `containers:` リストを行単位で走査する。

use std::ops::Range;

/// 1行分（改行を含まない）
struct Line<'a> {
    offset: usize,
    text: &'a str,
}

fn split_lines(source: &str) -> Vec<Line<'_>> {
    let mut offset = 0;
    source
        .split_inclusive('\n')
        .map(|raw| {
            let line = Line {
                offset,
                text: raw.trim_end_matches(['\n', '\r']),
            };
            offset += raw.len();
            line
        })
        .collect()
}

fn indent_of(text: &str) -> usize {
    text.len() - text.trim_start_matches(' ').len()
}

fn is_ignorable(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.is_empty() || trimmed.starts_with('#')
}

fn is_document_marker(text: &str) -> bool {
    text.starts_with("---") || text.starts_with("...")
}

/// リスト項目の行なら、項目内容の開始桁を返す（`- ` の後ろ）
fn item_content_column(text: &str) -> Option<usize> {
    let indent = indent_of(text);
    let rest = &text[indent..];
    if rest == "-" {
        return Some(usize::MAX);
    }
    let after = rest.strip_prefix("- ")?;
    Some(indent + 2 + indent_of(after))
}

/// `containers:` キーの行ならキーの桁を返す（値がブロックで続く場合のみ）
fn containers_key_column(text: &str) -> Option<usize> {
    let indent = indent_of(text);
    let (column, rest) = match item_content_column(text) {
        Some(column) if column != usize::MAX => (column, &text[column..]),
        _ => (indent, &text[indent..]),
    };
    let value = rest.strip_prefix("containers:")?;
    is_ignorable(value).then_some(column)
}

/// `key: value` の value 部分（引用符の内側）の範囲
///
/// `content` はキーの先頭から始まる文字列。
pub(crate) fn scalar_value(content: &str, key: &str) -> Option<Range<usize>> {
    let after_key = content.strip_prefix(key)?.strip_prefix(':')?;
    let value_start = content.len() - after_key.len();
    if !after_key.is_empty() && !after_key.starts_with(' ') {
        return None;
    }
    let leading = indent_of(after_key);
    let value = &after_key[leading..];
    let start = value_start + leading;

    let range = if let Some(inner) = value.strip_prefix('"') {
        let mut escaped = false;
        let end = inner.char_indices().find_map(|(i, c)| {
            if escaped {
                escaped = false;
                None
            } else if c == '\\' {
                escaped = true;
                None
            } else if c == '"' {
                Some(i)
            } else {
                None
            }
        })?;
        start + 1..start + 1 + end
    } else if let Some(inner) = value.strip_prefix('\'') {
        let end = inner.find('\'')?;
        start + 1..start + 1 + end
    } else {
        let end = value.find(" #").unwrap_or(value.len());
        let plain = value[..end].trim_end();
        if plain.is_empty() || plain.starts_with(['|', '>', '&', '*', '{', '[']) {
            return None;
        }
        start..start + plain.len()
    };
    Some(range)
}

/// コンテナ項目1つ分の走査結果
struct ContainerItem {
    name: Option<String>,
    image: Option<Range<usize>>,
}

/// 名前が `container` の項目の image 値の範囲（ソース全体でのバイト位置）を全て返す
pub(crate) fn locate_image_values(source: &str, container: &str) -> Vec<Range<usize>> {
    let lines = split_lines(source);
    let mut found = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        match containers_key_column(lines[i].text) {
            Some(key_column) => {
                let (items, next) = scan_items(&lines, i + 1, key_column);
                found.extend(
                    items
                        .into_iter()
                        .filter(|item| item.name.as_deref() == Some(container))
                        .filter_map(|item| item.image),
                );
                i = next;
            }
            None => i += 1,
        }
    }

    found
}

/// `containers:` 直下のリスト項目を走査し、項目と次に見るべき行を返す
fn scan_items(lines: &[Line<'_>], start: usize, key_column: usize) -> (Vec<ContainerItem>, usize) {
    let mut items: Vec<ContainerItem> = Vec::new();
    let mut dash_column: Option<usize> = None;
    let mut content_column = usize::MAX;
    let mut j = start;

    while j < lines.len() {
        let line = &lines[j];
        if is_ignorable(line.text) {
            j += 1;
            continue;
        }
        if is_document_marker(line.text) {
            break;
        }

        let indent = indent_of(line.text);
        let item_column = item_content_column(line.text);

        let starts_item = match (item_column, dash_column) {
            (Some(_), None) if indent >= key_column => {
                dash_column = Some(indent);
                true
            }
            (Some(_), Some(dash)) if indent == dash => true,
            (_, Some(dash)) if indent > dash => false,
            _ => break,
        };

        if starts_item {
            items.push(ContainerItem {
                name: None,
                image: None,
            });
            content_column = item_column.unwrap_or(usize::MAX);
            if content_column == usize::MAX {
                // `-` だけの行: 次の行の字下げが項目の桁
                j += 1;
                continue;
            }
        } else if content_column == usize::MAX {
            content_column = indent;
        }

        if let Some(item) = items.last_mut()
            && (starts_item || indent == content_column)
            && content_column <= line.text.len()
        {
            let content = &line.text[content_column..];
            if let Some(range) = scalar_value(content, "name") {
                item.name = Some(content[range].to_string());
            } else if let Some(range) = scalar_value(content, "image") {
                let base = line.offset + content_column;
                item.image = Some(base + range.start..base + range.end);
            }
        }

        j += 1;
    }

    (items, j)
}
