use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::semantic::chunker::{DEFAULT_DIRECTORY_CHUNK_CAP, DEFAULT_MAX_DEPTH};
use crate::semantic::search::{DEFAULT_DIRECTORY_TOP_K, DEFAULT_TOP_K};
use crate::storage::{self, StorageManager};

const CONFIG_FILE: &str = "config.yaml";

/// Default embedding model
const DEFAULT_SEMANTIC_MODEL: &str = "all-MiniLM-L6-v2";

/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

const DEFAULT_EMBED_BATCH_SIZE: usize = 32;

const DEFAULT_DEBOUNCE_MS: u64 = 300;

/// Configuration for the embedding model
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SemanticSearchConfig {
    /// Model name for embeddings (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_semantic_model")]
    pub model: String,

    /// Allow fetching the model when it is not cached yet
    #[serde(default = "default_true")]
    pub allow_download: bool,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    /// Texts per embedding call; progress is reported after each
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,
}

impl Default for SemanticSearchConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_SEMANTIC_MODEL.to_string(),
            allow_download: true,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// How deep JSON documents are descended
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Fragments kept per file when indexing a directory
    #[serde(default = "default_directory_chunk_cap")]
    pub directory_chunk_cap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            directory_chunk_cap: DEFAULT_DIRECTORY_CHUNK_CAP,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_directory_top_k")]
    pub directory_top_k: usize,

    /// Quiet period before an interactive query runs
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            directory_top_k: DEFAULT_DIRECTORY_TOP_K,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_semantic_model() -> String {
    DEFAULT_SEMANTIC_MODEL.to_string()
}

fn default_true() -> bool {
    true
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_embed_batch_size() -> usize {
    DEFAULT_EMBED_BATCH_SIZE
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_directory_chunk_cap() -> usize {
    DEFAULT_DIRECTORY_CHUNK_CAP
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_directory_top_k() -> usize {
    DEFAULT_DIRECTORY_TOP_K
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub semantic_search: SemanticSearchConfig,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

/// Data directory: `FILELENS_BASE_PATH`, else `~/.local/share/filelens`.
pub fn base_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var("FILELENS_BASE_PATH") {
        return Ok(PathBuf::from(path));
    }

    let home = homedir::my_home()
        .context("failed to resolve home directory")?
        .context("home directory is not set")?;

    Ok(home.join(".local").join("share").join("filelens"))
}

impl Config {
    fn validate(&self) -> anyhow::Result<()> {
        let sem = &self.semantic_search;
        if sem.model.trim().is_empty() {
            bail!("semantic_search.model must not be empty");
        }

        if sem.download_timeout_secs == 0 {
            bail!("semantic_search.download_timeout_secs must be greater than 0");
        }

        if sem.embed_batch_size == 0 {
            bail!("semantic_search.embed_batch_size must be greater than 0");
        }

        if self.chunking.directory_chunk_cap == 0 {
            bail!("chunking.directory_chunk_cap must be greater than 0");
        }

        if self.search.top_k == 0 || self.search.directory_top_k == 0 {
            bail!("search.top_k and search.directory_top_k must be greater than 0");
        }

        Ok(())
    }

    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        let store = storage::BackendLocal::new(base_path)
            .with_context(|| format!("failed to create {}", base_path.display()))?;

        // create new if does not exist
        if !store.exists(CONFIG_FILE) {
            store.write(CONFIG_FILE, serde_yml::to_string(&Self::default())?.as_bytes())?;
        }

        let config_str = String::from_utf8(store.read(CONFIG_FILE)?)
            .context("config file is not valid utf8")?;
        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;
        config.base_path = base_path.to_path_buf();
        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let store = storage::BackendLocal::new(&self.base_path)?;
        let config_str = serde_yml::to_string(&self)?;
        store.write(CONFIG_FILE, config_str.as_bytes())?;
        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creates_default_config() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load_with(tmp.path()).unwrap();

        assert!(tmp.path().join(CONFIG_FILE).exists());
        assert_eq!(config.semantic_search.model, DEFAULT_SEMANTIC_MODEL);
        assert_eq!(config.chunking.max_depth, 3);
        assert_eq!(config.chunking.directory_chunk_cap, 20);
        assert_eq!(config.search.top_k, 10);
        assert_eq!(config.search.directory_top_k, 15);
        assert_eq!(config.search.debounce_ms, 300);
        assert!(config.cache.enabled);
        assert_eq!(config.base_path(), tmp.path());
    }

    #[test]
    fn test_fills_missing_fields_and_resaves() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE),
            "semantic_search:\n  model: bge-small-en-v1.5\n",
        )
        .unwrap();

        let config = Config::load_with(tmp.path()).unwrap();
        assert_eq!(config.semantic_search.model, "bge-small-en-v1.5");
        assert_eq!(config.semantic_search.embed_batch_size, 32);

        let saved = std::fs::read_to_string(tmp.path().join(CONFIG_FILE)).unwrap();
        assert!(saved.contains("directory_chunk_cap"));
    }

    #[test]
    fn test_rejects_invalid_values() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE),
            "chunking:\n  directory_chunk_cap: 0\n",
        )
        .unwrap();

        let err = Config::load_with(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("directory_chunk_cap"));
    }

    #[test]
    fn test_accepts_zero_json_depth() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE), "chunking:\n  max_depth: 0\n").unwrap();

        let config = Config::load_with(tmp.path()).unwrap();
        assert_eq!(config.chunking.max_depth, 0);
    }

    #[test]
    fn test_rejects_malformed_yaml() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE), "search: [not, a, map\n").unwrap();
        assert!(Config::load_with(tmp.path()).is_err());
    }
}
