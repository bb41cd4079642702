//! Splits structured file content into embeddable fragments.
//!
//! Policy by file type:
//! - CSV: one fragment per data row, `"header: value, ..."`
//! - JSON: depth-capped descent, one summary per object plus one fragment
//!   per primitive array element
//! - Text/Markdown: paragraphs when there is more than one, else lines
//!
//! Fragments always come out in source order. Chunking never fails; content
//! that does not fit the declared file type yields no fragments.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::content::{Content, FileType};
use crate::files::FileIdentity;

/// Default recursion cap for JSON descent.
pub const DEFAULT_MAX_DEPTH: usize = 3;

/// Default number of fragments kept per file in directory mode.
pub const DEFAULT_DIRECTORY_CHUNK_CAP: usize = 20;

/// Character width of a directory-mode JSON slice.
const JSON_SLICE_CHARS: usize = 200;

/// Characters kept from a JSON file that fails to parse.
const JSON_FALLBACK_CHARS: usize = 500;

const ROOT_PATH: &str = "root";

static PARAGRAPH_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n\s*\n").expect("paragraph regex is valid"));

/// Where a fragment sits in its source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "at", rename_all = "snake_case")]
pub enum Location {
    /// 1-based data row, header excluded
    Row(usize),
    /// Structural path such as `root.items[2]`
    Path(String),
    /// 1-based line the fragment starts on
    Line(usize),
    /// 0-based slice ordinal
    Chunk(usize),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Row(row) => write!(f, "Row {row}"),
            Location::Path(path) => f.write_str(path),
            Location::Line(line) => write!(f, "Line {line}"),
            Location::Chunk(chunk) => write!(f, "Chunk {chunk}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub text: String,
    pub location: Location,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<FileIdentity>,
}

impl Fragment {
    pub fn new(text: impl Into<String>, location: Location) -> Self {
        Self {
            text: text.into(),
            location,
            source: None,
        }
    }

    pub fn with_source(mut self, source: FileIdentity) -> Self {
        self.source = Some(source);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
    pub max_depth: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Chunk structured content according to its file type.
pub fn chunk(content: &Content, file_type: FileType, options: &ChunkOptions) -> Vec<Fragment> {
    match (file_type, content) {
        (FileType::Csv, Content::Table(rows)) => chunk_table(rows),
        (FileType::Json, Content::Tree(value)) => chunk_tree(value, options.max_depth),
        (FileType::Text | FileType::Markdown, Content::Text(text)) => chunk_text(text),
        _ => vec![],
    }
}

/// Chunk raw file text for a directory-wide index, keeping at most `cap`
/// fragments. CSV rows are paired with the header line; JSON is pretty
/// printed and sliced.
pub fn chunk_for_directory(raw: &str, file_type: FileType, cap: usize) -> Vec<Fragment> {
    if raw.trim().is_empty() || cap == 0 {
        return vec![];
    }

    match file_type {
        FileType::Csv => chunk_csv_preview(raw, cap),
        FileType::Json => chunk_json_preview(raw, cap),
        FileType::Text | FileType::Markdown => {
            let mut fragments = chunk_text(raw);
            fragments.truncate(cap);
            fragments
        }
    }
}

fn chunk_table(rows: &[Vec<String>]) -> Vec<Fragment> {
    let Some((header, data)) = rows.split_first() else {
        return vec![];
    };

    data.iter()
        .enumerate()
        .map(|(i, row)| {
            let text = header
                .iter()
                .enumerate()
                .map(|(j, name)| {
                    let value = row.get(j).map(String::as_str).unwrap_or("");
                    format!("{name}: {value}")
                })
                .collect::<Vec<_>>()
                .join(", ");
            Fragment::new(text, Location::Row(i + 1))
        })
        .collect()
}

fn chunk_tree(value: &Value, max_depth: usize) -> Vec<Fragment> {
    let mut fragments = Vec::new();

    if is_container(value) {
        descend(value, ROOT_PATH, 0, max_depth, &mut fragments);
    } else if !value.is_null() {
        fragments.push(Fragment::new(
            format!("{ROOT_PATH}: {value}"),
            Location::Path(ROOT_PATH.to_string()),
        ));
    }

    fragments
}

fn descend(value: &Value, path: &str, depth: usize, max_depth: usize, out: &mut Vec<Fragment>) {
    if depth > max_depth {
        return;
    }

    match value {
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                let item_path = format!("{path}[{i}]");
                if is_container(item) {
                    descend(item, &item_path, depth + 1, max_depth, out);
                } else {
                    out.push(Fragment::new(
                        format!("{item_path}: {item}"),
                        Location::Path(item_path),
                    ));
                }
            }
        }
        Value::Object(map) => {
            let summary = map
                .iter()
                .map(|(key, value)| format!("{key}: {}", compact(value)))
                .collect::<Vec<_>>()
                .join(", ");

            if !summary.is_empty() {
                out.push(Fragment::new(summary, Location::Path(path.to_string())));
            }

            for (key, value) in map {
                if is_container(value) {
                    descend(value, &format!("{path}.{key}"), depth + 1, max_depth, out);
                }
            }
        }
        _ => {}
    }
}

fn is_container(value: &Value) -> bool {
    matches!(value, Value::Array(_) | Value::Object(_))
}

/// Summary rendering: nested containers collapse to a placeholder.
fn compact(value: &Value) -> String {
    match value {
        Value::Array(items) => format!("[{} items]", items.len()),
        Value::Object(_) => "{...}".to_string(),
        other => other.to_string(),
    }
}

fn chunk_text(text: &str) -> Vec<Fragment> {
    let paragraphs = paragraphs(text);

    if paragraphs.len() > 1 {
        return paragraphs
            .into_iter()
            .map(|(line, paragraph)| Fragment::new(paragraph, Location::Line(line)))
            .collect();
    }

    text.split('\n')
        .enumerate()
        .filter_map(|(i, line)| {
            let line_text = line.trim();
            (!line_text.is_empty()).then(|| Fragment::new(line_text, Location::Line(i + 1)))
        })
        .collect()
}

/// Non-empty paragraphs with the 1-based line of their first visible character.
fn paragraphs(text: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut lines = LineCounter::default();
    let mut start = 0;

    let mut push = |segment_start: usize, segment_end: usize, lines: &mut LineCounter| {
        let segment = &text[segment_start..segment_end];
        let trimmed = segment.trim();
        if trimmed.is_empty() {
            return;
        }
        let lead = segment.len() - segment.trim_start().len();
        out.push((lines.line_at(text, segment_start + lead), trimmed));
    };

    for found in PARAGRAPH_BREAK.find_iter(text) {
        push(start, found.start(), &mut lines);
        start = found.end();
    }
    push(start, text.len(), &mut lines);

    out
}

/// Incremental newline counter; positions must be queried in ascending order.
#[derive(Default)]
struct LineCounter {
    pos: usize,
    newlines: usize,
}

impl LineCounter {
    fn line_at(&mut self, text: &str, byte: usize) -> usize {
        self.newlines += text[self.pos..byte].bytes().filter(|&b| b == b'\n').count();
        self.pos = byte;
        self.newlines + 1
    }
}

fn chunk_csv_preview(raw: &str, cap: usize) -> Vec<Fragment> {
    let mut lines = raw
        .split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty());

    let Some(header) = lines.next() else {
        return vec![];
    };

    lines
        .take(cap)
        .enumerate()
        .map(|(i, line)| Fragment::new(format!("{header}\n{line}"), Location::Row(i + 1)))
        .collect()
}

fn chunk_json_preview(raw: &str, cap: usize) -> Vec<Fragment> {
    let pretty = match serde_json::from_str::<Value>(raw) {
        Ok(value) => pretty_one_space(&value),
        Err(_) => {
            let head: String = raw.chars().take(JSON_FALLBACK_CHARS).collect();
            return vec![Fragment::new(head, Location::Chunk(0))];
        }
    };

    let chars: Vec<char> = pretty.chars().collect();
    chars
        .chunks(JSON_SLICE_CHARS)
        .take(cap)
        .enumerate()
        .map(|(i, slice)| Fragment::new(slice.iter().collect::<String>(), Location::Chunk(i)))
        .collect()
}

fn pretty_one_space(value: &Value) -> String {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    if value.serialize(&mut serializer).is_err() {
        return value.to_string();
    }
    String::from_utf8(buf).unwrap_or_else(|_| value.to_string())
}
