//! File access for directory indexing.
//!
//! A `FileRef` names something that can be fetched: a local path or an
//! `http(s)` URL. `FileSource` is the seam the directory indexer fetches
//! through, so hosts (and tests) can plug in their own access layer.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Identity of the file a fragment came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileIdentity {
    pub name: String,
    /// Path or URL the file was fetched from
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub name: String,
    pub location: String,
    #[serde(default)]
    pub is_dir: bool,
}

impl FileRef {
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            is_dir: false,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());

        Self {
            name,
            location: path.to_string_lossy().to_string(),
            is_dir: path.is_dir(),
        }
    }

    pub fn identity(&self) -> FileIdentity {
        FileIdentity {
            name: self.name.clone(),
            location: self.location.clone(),
        }
    }
}

/// Fetches the raw text of a file. Failures are per file.
pub trait FileSource: Send + Sync {
    fn fetch(&self, file: &FileRef) -> Result<String>;
}

/// Reads local paths from disk and `http(s)` locations over the network.
pub struct LocalFileSource {
    client: reqwest::blocking::Client,
}

impl LocalFileSource {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .context("failed to build http client")?;
        Ok(Self { client })
    }

    fn fetch_url(&self, url: &Url) -> Result<String> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()?;
        Ok(response.text()?)
    }
}

impl FileSource for LocalFileSource {
    fn fetch(&self, file: &FileRef) -> Result<String> {
        if file.is_dir {
            bail!("{} is a directory", file.location);
        }

        match Url::parse(&file.location) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => self.fetch_url(&url),
            _ => std::fs::read_to_string(&file.location)
                .with_context(|| format!("failed to read {}", file.location)),
        }
    }
}

/// List the immediate entries of a directory, sorted by name.
pub fn list_directory(dir: &Path) -> Result<Vec<FileRef>> {
    let mut files: Vec<FileRef> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| FileRef::from_path(&entry.path()))
        .collect();

    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_directory_sorted_with_dirs_flagged() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("b.txt"), "b").unwrap();
        std::fs::write(tmp.path().join("a.csv"), "a").unwrap();
        std::fs::create_dir(tmp.path().join("c.json")).unwrap();

        let files = list_directory(tmp.path()).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.csv", "b.txt", "c.json"]);
        assert!(!files[0].is_dir);
        assert!(files[2].is_dir);
    }

    #[test]
    fn test_local_source_reads_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();

        let source = LocalFileSource::new().unwrap();
        assert_eq!(source.fetch(&FileRef::from_path(&path)).unwrap(), "hello");
    }

    #[test]
    fn test_local_source_missing_file_errors() {
        let source = LocalFileSource::new().unwrap();
        let file = FileRef::new("gone.txt", "/nonexistent/gone.txt");
        assert!(source.fetch(&file).is_err());
    }

    #[test]
    fn test_local_source_rejects_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let source = LocalFileSource::new().unwrap();
        assert!(source.fetch(&FileRef::from_path(tmp.path())).is_err());
    }
}
