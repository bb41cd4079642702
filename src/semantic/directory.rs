//! Cross-file index over a directory listing.
//!
//! Files are processed one at a time; a file that cannot be fetched or
//! embedded is skipped so one bad file never sinks the whole directory.

use std::sync::Arc;

use crate::content::{is_supported, FileType};
use crate::files::{FileRef, FileSource};
use crate::semantic::builder::IndexBuilder;
use crate::semantic::chunker::chunk_for_directory;
use crate::semantic::embeddings::{require_ready, EmbeddingProvider};
use crate::semantic::index::{Index, IndexEntry};
use crate::semantic::service::SemanticSearchError;

#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryIndex {
    pub index: Index,
    /// Files that contributed at least one entry
    pub file_count: usize,
}

pub struct DirectoryIndexer {
    provider: Arc<dyn EmbeddingProvider>,
    source: Arc<dyn FileSource>,
    builder: IndexBuilder,
    chunk_cap: usize,
}

impl DirectoryIndexer {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        source: Arc<dyn FileSource>,
        chunk_cap: usize,
    ) -> Self {
        Self {
            builder: IndexBuilder::new(provider.clone()),
            provider,
            source,
            chunk_cap,
        }
    }

    pub fn index_files(
        &self,
        files: &[FileRef],
        on_progress: &dyn Fn(f32),
    ) -> Result<DirectoryIndex, SemanticSearchError> {
        require_ready(&self.provider.status())?;

        let eligible: Vec<&FileRef> = files
            .iter()
            .filter(|f| !f.is_dir && is_supported(&f.name))
            .collect();

        log::info!(
            "indexing {} of {} directory entries",
            eligible.len(),
            files.len()
        );

        let mut entries = Vec::new();
        let mut file_count = 0;

        for (processed, file) in eligible.iter().enumerate() {
            match self.index_file(file) {
                Ok(file_entries) if !file_entries.is_empty() => {
                    entries.extend(file_entries);
                    file_count += 1;
                }
                Ok(_) => log::debug!("{} produced no fragments", file.name),
                Err(e) => log::warn!("Skipping {}: {:#}", file.name, e),
            }
            on_progress((processed + 1) as f32 / eligible.len() as f32);
        }

        Ok(DirectoryIndex {
            index: Index::new(self.provider.model_id(), entries)?,
            file_count,
        })
    }

    fn index_file(&self, file: &FileRef) -> anyhow::Result<Vec<IndexEntry>> {
        let raw = self.source.fetch(file)?;
        let fragments = chunk_for_directory(&raw, FileType::from_name(&file.name), self.chunk_cap)
            .into_iter()
            .map(|fragment| fragment.with_source(file.identity()))
            .collect::<Vec<_>>();

        if fragments.is_empty() {
            return Ok(vec![]);
        }

        Ok(self.builder.embed_fragments(fragments, &|_| {})?)
    }
}
