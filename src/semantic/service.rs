//! Semantic search service for file content.
//!
//! Provides a high-level interface over the pipeline:
//! - Model lifecycle (availability check, explicit load)
//! - Cached, content-addressed index builds
//! - Single-file and directory search
//!
//! At most one build per content hash runs at a time; a concurrent request
//! for the same content is rejected with `BuildInProgress`.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{ChunkingConfig, Config, SearchConfig};
use crate::content::{Content, FileType};
use crate::files::{FileRef, FileSource};
use crate::semantic::builder::IndexBuilder;
use crate::semantic::cache::{ContentHash, IndexCache};
use crate::semantic::chunker::{chunk, ChunkOptions};
use crate::semantic::directory::{DirectoryIndex, DirectoryIndexer};
use crate::semantic::embeddings::{EmbeddingError, EmbeddingProvider, ModelStatus};
use crate::semantic::index::{Index, IndexError, SearchResult};
use crate::semantic::search::{SearchEngine, SearchSession};

/// Errors that can occur during semantic search operations.
#[derive(Debug, thiserror::Error)]
pub enum SemanticSearchError {
    #[error("No searchable content found")]
    NoContent,

    #[error("No index to search")]
    NoIndex,

    #[error("An index build for this content is already running")]
    BuildInProgress,

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Search task failed: {0}")]
    TaskFailed(String),
}

impl SemanticSearchError {
    /// True when the model has to be downloaded or loaded first.
    pub fn is_model_missing(&self) -> bool {
        matches!(
            self,
            SemanticSearchError::Embedding(
                EmbeddingError::ModelNotReady(_) | EmbeddingError::ModelUnavailable(_)
            )
        )
    }
}

/// User-facing search state.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchStatus {
    ModelMissing,
    Building { progress: f32 },
    NoResults { query: String },
    Results { count: usize },
    Failed { message: String },
}

impl SearchStatus {
    pub fn for_results(query: &str, results: &[SearchResult]) -> Self {
        if results.is_empty() {
            SearchStatus::NoResults {
                query: query.to_string(),
            }
        } else {
            SearchStatus::Results {
                count: results.len(),
            }
        }
    }

    pub fn for_error(error: &SemanticSearchError) -> Self {
        if error.is_model_missing() {
            SearchStatus::ModelMissing
        } else {
            SearchStatus::Failed {
                message: error.to_string(),
            }
        }
    }
}

impl fmt::Display for SearchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchStatus::ModelMissing => write!(
                f,
                "Download the embedding model (`filelens load`) to enable semantic search."
            ),
            SearchStatus::Building { progress } => {
                write!(f, "Building search index... {}%", (progress * 100.0).round() as u32)
            }
            SearchStatus::NoResults { query } => write!(f, "No results found for \"{query}\""),
            SearchStatus::Results { count: 1 } => write!(f, "1 result"),
            SearchStatus::Results { count } => write!(f, "{count} results"),
            SearchStatus::Failed { message } => write!(f, "Search failed: {message}"),
        }
    }
}

/// Removes its key from the in-flight set when the build ends.
struct BuildGuard<'a> {
    in_flight: &'a Mutex<HashSet<ContentHash>>,
    hash: ContentHash,
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        in_flight.remove(&self.hash);
    }
}

pub struct SemanticSearchService {
    provider: Arc<dyn EmbeddingProvider>,
    engine: Arc<SearchEngine>,
    builder: IndexBuilder,
    directory: DirectoryIndexer,
    cache: Option<IndexCache>,
    chunking: ChunkingConfig,
    search: SearchConfig,
    in_flight: Mutex<HashSet<ContentHash>>,
}

impl SemanticSearchService {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        source: Arc<dyn FileSource>,
        config: &Config,
    ) -> Self {
        Self {
            engine: Arc::new(SearchEngine::new(provider.clone())),
            builder: IndexBuilder::new(provider.clone()),
            directory: DirectoryIndexer::new(
                provider.clone(),
                source,
                config.chunking.directory_chunk_cap,
            ),
            provider,
            cache: None,
            chunking: config.chunking.clone(),
            search: config.search.clone(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_cache(mut self, cache: IndexCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn status(&self) -> ModelStatus {
        self.provider.status()
    }

    pub fn check_availability(&self) -> ModelStatus {
        self.provider.check_availability()
    }

    pub fn load_model(&self, on_progress: &dyn Fn(f32)) -> Result<(), SemanticSearchError> {
        Ok(self.provider.load(on_progress)?)
    }

    /// Build (or fetch from cache) the index for one file's content.
    pub fn build_index(
        &self,
        content: &Content,
        file_type: FileType,
        on_progress: &dyn Fn(f32),
    ) -> Result<Arc<Index>, SemanticSearchError> {
        if content.is_empty() {
            return Err(SemanticSearchError::NoContent);
        }

        let hash = ContentHash::of(content);
        let _guard = self.begin_build(hash)?;

        if let Some(index) = self.cache.as_ref().and_then(|cache| cache.get(&hash)) {
            log::info!("Using cached index for {hash} ({} entries)", index.len());
            on_progress(1.0);
            return Ok(Arc::new(index));
        }

        let options = ChunkOptions {
            max_depth: self.chunking.max_depth,
        };
        let fragments = chunk(content, file_type, &options);
        if fragments.is_empty() {
            return Err(SemanticSearchError::NoContent);
        }

        log::info!("Building index for {hash}: {} fragments", fragments.len());
        let index = self.builder.build(fragments, on_progress)?;

        if let Some(cache) = &self.cache {
            cache.put(&hash, &index);
        }

        Ok(Arc::new(index))
    }

    /// Index every supported file in `files`. Directory indexes are not cached.
    pub fn build_directory_index(
        &self,
        files: &[FileRef],
        on_progress: &dyn Fn(f32),
    ) -> Result<DirectoryIndex, SemanticSearchError> {
        self.directory.index_files(files, on_progress)
    }

    pub fn search(
        &self,
        index: &Index,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<SearchResult>, SemanticSearchError> {
        self.engine
            .search(index, query, top_k.unwrap_or(self.search.top_k))
    }

    pub fn search_directory(
        &self,
        index: &Index,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<SearchResult>, SemanticSearchError> {
        self.engine
            .search_directory(index, query, top_k.unwrap_or(self.search.directory_top_k))
    }

    /// Debounced session for interactive querying.
    pub fn session(&self) -> SearchSession {
        SearchSession::new(
            self.engine.clone(),
            Duration::from_millis(self.search.debounce_ms),
        )
    }

    /// Delete all cached indexes. Returns how many were removed.
    pub fn clear_cache(&self) -> usize {
        self.cache.as_ref().map(|cache| cache.clear()).unwrap_or(0)
    }

    fn begin_build(&self, hash: ContentHash) -> Result<BuildGuard<'_>, SemanticSearchError> {
        let mut in_flight = match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if !in_flight.insert(hash) {
            log::debug!("build for {hash} already in flight");
            return Err(SemanticSearchError::BuildInProgress);
        }

        Ok(BuildGuard {
            in_flight: &self.in_flight,
            hash,
        })
    }
}
