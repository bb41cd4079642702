use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Key → blob store backing the index cache.
pub trait StorageManager: Send + Sync {
    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()>;
    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>>;
    fn exists(&self, ident: &str) -> bool;
    fn delete(&self, ident: &str) -> std::io::Result<()>;
    fn list(&self) -> Vec<String>;
}

/// Directory-backed store. One file per key, written via temp file + rename
/// so readers never observe a half-written blob.
#[derive(Clone)]
pub struct BackendLocal {
    pub base_dir: PathBuf,
}

impl BackendLocal {
    pub fn new(storage_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;
        Ok(BackendLocal { base_dir: path })
    }

    fn path_for(&self, ident: &str) -> PathBuf {
        self.base_dir.join(ident)
    }
}

impl StorageManager for BackendLocal {
    fn exists(&self, ident: &str) -> bool {
        std::fs::metadata(self.path_for(ident)).is_ok()
    }

    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.path_for(ident))
    }

    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()> {
        let path = self.path_for(ident);
        let temp_path = self
            .base_dir
            .join(format!(".{}-{ident}.tmp", rusty_ulid::generate_ulid_string()));

        if let Err(e) = std::fs::write(&temp_path, data) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e);
        }

        std::fs::rename(&temp_path, &path).inspect_err(|_| {
            let _ = std::fs::remove_file(&temp_path);
        })
    }

    fn delete(&self, ident: &str) -> std::io::Result<()> {
        std::fs::remove_file(self.path_for(ident))
    }

    fn list(&self) -> Vec<String> {
        std::fs::read_dir(&self.base_dir)
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .filter_map(|entry| {
                        let path = entry.path();
                        if path.is_file() {
                            path.file_name()
                                .and_then(|name| name.to_str())
                                .filter(|name| !name.starts_with('.'))
                                .map(|s| s.to_string())
                        } else {
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// In-process store. Used by tests and by hosts that want a session-only cache.
#[derive(Default)]
pub struct BackendMemory {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl BackendMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> std::io::Error {
    std::io::Error::other(format!("storage lock poisoned: {e}"))
}

impl StorageManager for BackendMemory {
    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()> {
        self.blobs
            .write()
            .map_err(poisoned)?
            .insert(ident.to_string(), data.to_vec());
        Ok(())
    }

    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>> {
        self.blobs
            .read()
            .map_err(poisoned)?
            .get(ident)
            .cloned()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, ident.to_string()))
    }

    fn exists(&self, ident: &str) -> bool {
        self.blobs
            .read()
            .map(|blobs| blobs.contains_key(ident))
            .unwrap_or(false)
    }

    fn delete(&self, ident: &str) -> std::io::Result<()> {
        self.blobs
            .write()
            .map_err(poisoned)?
            .remove(ident)
            .map(|_| ())
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, ident.to_string()))
    }

    fn list(&self) -> Vec<String> {
        self.blobs
            .read()
            .map(|blobs| {
                let mut keys: Vec<String> = blobs.keys().cloned().collect();
                keys.sort();
                keys
            })
            .unwrap_or_default()
    }
}
