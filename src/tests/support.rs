//! Deterministic test doubles for the semantic pipeline.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use anyhow::bail;
use sha2::{Digest, Sha256};

use crate::files::{FileRef, FileSource};
use crate::storage::StorageManager;
use crate::semantic::embeddings::{
    require_ready, EmbeddingError, EmbeddingProvider, ModelStatus, StatusKind,
};

/// Bag-of-words embedder: each word maps to a fixed pseudo-random vector and
/// a text embeds as the sum of its words. Identical text gives identical
/// vectors; texts sharing words score higher.
pub struct FakeProvider {
    dimensions: usize,
    status: RwLock<ModelStatus>,
    calls: AtomicUsize,
    embedded_texts: AtomicUsize,
    fail_on: Option<String>,
}

impl FakeProvider {
    pub fn ready(dimensions: usize) -> Self {
        Self::with_status(dimensions, StatusKind::Ready)
    }

    pub fn with_status(dimensions: usize, kind: StatusKind) -> Self {
        Self {
            dimensions,
            status: RwLock::new(ModelStatus::new(kind)),
            calls: AtomicUsize::new(0),
            embedded_texts: AtomicUsize::new(0),
            fail_on: None,
        }
    }

    /// Fail any embedding call whose input contains `needle`.
    pub fn failing_on(mut self, needle: &str) -> Self {
        self.fail_on = Some(needle.to_string());
        self
    }

    /// Number of `embed` + `embed_batch` calls that reached the model.
    pub fn embed_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn embedded_texts(&self) -> usize {
        self.embedded_texts.load(Ordering::SeqCst)
    }

    /// The vector `embed` would return, without counting a call.
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dimensions];
        for word in text.split_whitespace() {
            let word = word.to_lowercase();
            for (i, value) in vector.iter_mut().enumerate() {
                let digest = Sha256::digest(format!("{word}#{}", i / 32).as_bytes());
                *value += digest[i % 32] as f32 / 127.5 - 1.0;
            }
        }
        vector
    }

    fn check(&self, texts: &[&str]) -> Result<(), EmbeddingError> {
        require_ready(&self.status())?;
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(needle) = &self.fail_on {
            if texts.iter().any(|t| t.contains(needle.as_str())) {
                return Err(EmbeddingError::EmbeddingFailed(format!("refusing {needle}")));
            }
        }

        self.embedded_texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(())
    }
}

impl EmbeddingProvider for FakeProvider {
    fn model_id(&self) -> &str {
        "fake-embedder"
    }

    fn status(&self) -> ModelStatus {
        self.status.read().unwrap().clone()
    }

    fn check_availability(&self) -> ModelStatus {
        self.status()
    }

    fn load(&self, on_progress: &dyn Fn(f32)) -> Result<(), EmbeddingError> {
        on_progress(0.0);
        *self.status.write().unwrap() = ModelStatus::new(StatusKind::Ready);
        on_progress(1.0);
        Ok(())
    }

    fn dimensions(&self) -> Option<usize> {
        Some(self.dimensions)
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.check(&[text])?;
        Ok(self.vector_for(text))
    }

    fn embed_batch(
        &self,
        texts: &[String],
        on_progress: &dyn Fn(f32),
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        self.check(&refs)?;

        let vectors = texts.iter().map(|t| self.vector_for(t)).collect();
        on_progress(1.0);
        Ok(vectors)
    }
}

/// In-memory file source. Names listed in `failing` error on fetch.
#[derive(Default)]
pub struct FakeFileSource {
    files: Vec<(String, String)>,
    failing: HashSet<String>,
    fetched: Mutex<Vec<String>>,
}

impl FakeFileSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, name: &str, body: &str) -> Self {
        self.files.push((name.to_string(), body.to_string()));
        self
    }

    pub fn with_failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self.files.push((name.to_string(), String::new()));
        self
    }

    /// File refs for every registered file, in registration order.
    pub fn refs(&self) -> Vec<FileRef> {
        self.files
            .iter()
            .map(|(name, _)| FileRef::new(name.as_str(), format!("mem://{name}")))
            .collect()
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

impl FileSource for FakeFileSource {
    fn fetch(&self, file: &FileRef) -> anyhow::Result<String> {
        self.fetched.lock().unwrap().push(file.name.clone());

        if self.failing.contains(&file.name) {
            bail!("permission denied: {}", file.name);
        }

        match self.files.iter().find(|(name, _)| *name == file.name) {
            Some((_, body)) => Ok(body.clone()),
            None => bail!("no such file: {}", file.name),
        }
    }
}

/// Store whose every read, write and delete fails. `exists` claims the key
/// is there so reads are actually attempted.
#[derive(Default)]
pub struct FailingStore {
    writes: AtomicUsize,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempted_writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn error(op: &str, ident: &str) -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::PermissionDenied, format!("{op} {ident}: read-only"))
    }
}

impl StorageManager for FailingStore {
    fn write(&self, ident: &str, _data: &[u8]) -> std::io::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(Self::error("write", ident))
    }

    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>> {
        Err(Self::error("read", ident))
    }

    fn exists(&self, _ident: &str) -> bool {
        true
    }

    fn delete(&self, ident: &str) -> std::io::Result<()> {
        Err(Self::error("delete", ident))
    }

    fn list(&self) -> Vec<String> {
        vec!["index-00000000-stale.bin".to_string()]
    }
}
