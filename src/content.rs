//! Structured file content handed to the chunker.
//!
//! Raw file text is turned into one of three shapes:
//! - `Table`: CSV rows, first row is the header
//! - `Tree`: a parsed JSON document
//! - `Text`: plain text or markdown, passed through untouched

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Extensions the directory indexer will pick up.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["csv", "json", "txt", "md", "markdown"];

/// Delimiters tried when sniffing a CSV header line.
const CSV_DELIMITERS: &[u8] = b",\t;|";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Csv,
    Json,
    Text,
    Markdown,
}

impl FileType {
    /// Map a file name to its type. Unknown extensions are treated as text.
    pub fn from_name(name: &str) -> Self {
        match extension(name).as_str() {
            "csv" => FileType::Csv,
            "json" => FileType::Json,
            "md" | "markdown" => FileType::Markdown,
            _ => FileType::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Csv => "csv",
            FileType::Json => "json",
            FileType::Text => "txt",
            FileType::Markdown => "md",
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lowercased extension of a file name, empty when there is none.
pub fn extension(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((_, ext)) => ext.to_lowercase(),
        None => String::new(),
    }
}

pub fn is_supported(name: &str) -> bool {
    SUPPORTED_EXTENSIONS.contains(&extension(name).as_str())
}

#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Table(Vec<Vec<String>>),
    Tree(Value),
    Text(String),
}

impl Content {
    /// Stable serialization of the exact content, used for content hashing.
    /// Text is kept raw; structured data is stringified as compact JSON. The
    /// kind prefix keeps a text file from sharing a hash with parsed data of
    /// the same bytes.
    pub fn canonical_string(&self) -> String {
        match self {
            Content::Text(text) => format!("text:{text}"),
            Content::Table(rows) => {
                format!("table:{}", serde_json::to_string(rows).unwrap_or_default())
            }
            Content::Tree(value) => format!("tree:{value}"),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Content::Table(rows) => rows.is_empty(),
            Content::Tree(value) => value.is_null(),
            Content::Text(text) => text.trim().is_empty(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("CSV parse error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parse raw file text into the structure the chunker expects.
pub fn parse(raw: &str, file_type: FileType) -> Result<Content, ContentError> {
    match file_type {
        FileType::Csv => Ok(Content::Table(parse_csv(raw)?)),
        FileType::Json => Ok(Content::Tree(serde_json::from_str(raw)?)),
        FileType::Text | FileType::Markdown => Ok(Content::Text(raw.to_string())),
    }
}

fn parse_csv(raw: &str) -> Result<Vec<Vec<String>>, csv::Error> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(vec![]);
    }

    let header_line = raw.lines().next().unwrap_or_default();
    let delimiter = sniff_delimiter(header_line);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .delimiter(delimiter)
        .from_reader(raw.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(|cell| cell.to_string()).collect());
    }

    Ok(rows)
}

/// Pick the delimiter that occurs most often on the header line.
/// Ties go to the earlier candidate, so plain comma wins by default.
fn sniff_delimiter(header_line: &str) -> u8 {
    let mut best = b',';
    let mut best_count = 0;

    for &candidate in CSV_DELIMITERS {
        let count = header_line.bytes().filter(|&b| b == candidate).count();
        if count > best_count {
            best = candidate;
            best_count = count;
        }
    }

    best
}
