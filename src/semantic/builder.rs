//! Turns fragments into an `Index` with a single batched embedding call.

use std::sync::Arc;

use crate::semantic::chunker::Fragment;
use crate::semantic::embeddings::{EmbeddingError, EmbeddingProvider};
use crate::semantic::index::{Index, IndexEntry};
use crate::semantic::service::SemanticSearchError;

pub struct IndexBuilder {
    provider: Arc<dyn EmbeddingProvider>,
}

impl IndexBuilder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { provider }
    }

    /// Embed all fragments and assemble an index. Fails as a whole: any
    /// provider error means no index is produced.
    pub fn build(
        &self,
        fragments: Vec<Fragment>,
        on_progress: &dyn Fn(f32),
    ) -> Result<Index, SemanticSearchError> {
        if fragments.is_empty() {
            return Err(SemanticSearchError::NoContent);
        }

        let entries = self.embed_fragments(fragments, on_progress)?;
        Ok(Index::new(self.provider.model_id(), entries)?)
    }

    /// Embed fragments in order, pairing each with its vector.
    pub fn embed_fragments(
        &self,
        fragments: Vec<Fragment>,
        on_progress: &dyn Fn(f32),
    ) -> Result<Vec<IndexEntry>, EmbeddingError> {
        let texts: Vec<String> = fragments.iter().map(|f| f.text.clone()).collect();
        log::debug!("embedding {} fragments with {}", texts.len(), self.provider.model_id());

        let vectors = self.provider.embed_batch(&texts, on_progress)?;
        if vectors.len() != fragments.len() {
            return Err(EmbeddingError::EmbeddingFailed(format!(
                "expected {} embeddings, got {}",
                fragments.len(),
                vectors.len()
            )));
        }

        Ok(fragments
            .into_iter()
            .zip(vectors)
            .map(|(fragment, embedding)| IndexEntry::new(fragment, embedding))
            .collect())
    }
}
