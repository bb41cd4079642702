//! Query embedding and ranking, plus latest-request-wins scheduling for
//! interactive search.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::files::FileIdentity;
use crate::semantic::embeddings::EmbeddingProvider;
use crate::semantic::index::{Index, SearchResult};
use crate::semantic::service::SemanticSearchError;

pub const DEFAULT_TOP_K: usize = 10;
pub const DEFAULT_DIRECTORY_TOP_K: usize = 15;

pub struct SearchEngine {
    provider: Arc<dyn EmbeddingProvider>,
}

impl SearchEngine {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { provider }
    }

    /// Rank index entries by similarity to `query`, best first.
    ///
    /// A blank query returns no results without touching the model.
    pub fn search(
        &self,
        index: &Index,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SearchResult>, SemanticSearchError> {
        if index.is_empty() {
            return Err(SemanticSearchError::NoIndex);
        }
        if query.trim().is_empty() {
            return Ok(vec![]);
        }

        let query_embedding = self.provider.embed(query)?;
        Ok(index.rank(&query_embedding, top_k)?)
    }

    /// Like `search`, but returns at most one fragment per source file.
    pub fn search_directory(
        &self,
        index: &Index,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SearchResult>, SemanticSearchError> {
        let ranked = self.search(index, query, index.len())?;

        let mut seen: HashSet<FileIdentity> = HashSet::new();
        let mut results: Vec<SearchResult> = ranked
            .into_iter()
            .filter(|result| match &result.fragment.source {
                Some(source) => seen.insert(source.clone()),
                None => true,
            })
            .collect();

        results.truncate(top_k);
        Ok(results)
    }
}

/// Token identifying one submitted query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SearchTicket(u64);

/// Hands out increasing tickets; only the newest one is current.
#[derive(Debug, Default)]
pub struct SearchSequencer {
    latest: AtomicU64,
}

impl SearchSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self) -> SearchTicket {
        SearchTicket(self.latest.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_current(&self, ticket: SearchTicket) -> bool {
        self.latest.load(Ordering::SeqCst) == ticket.0
    }
}

/// Debounced interactive search. A submission that is superseded before or
/// while it runs resolves to `None`.
#[derive(Clone)]
pub struct SearchSession {
    engine: Arc<SearchEngine>,
    sequencer: Arc<SearchSequencer>,
    debounce: Duration,
}

impl SearchSession {
    pub fn new(engine: Arc<SearchEngine>, debounce: Duration) -> Self {
        Self {
            engine,
            sequencer: Arc::new(SearchSequencer::new()),
            debounce,
        }
    }

    pub async fn submit(
        &self,
        index: Arc<Index>,
        query: String,
        top_k: usize,
    ) -> Option<Result<Vec<SearchResult>, SemanticSearchError>> {
        let ticket = self.sequencer.issue();

        tokio::time::sleep(self.debounce).await;
        if !self.sequencer.is_current(ticket) {
            log::debug!("query {ticket:?} superseded during debounce");
            return None;
        }

        let engine = self.engine.clone();
        let joined =
            tokio::task::spawn_blocking(move || engine.search(&index, &query, top_k)).await;

        if !self.sequencer.is_current(ticket) {
            log::debug!("dropping stale results for {ticket:?}");
            return None;
        }

        Some(joined.unwrap_or_else(|e| Err(SemanticSearchError::TaskFailed(e.to_string()))))
    }
}
