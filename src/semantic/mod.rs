//! Semantic search over file content.
//!
//! Local, model-backed search: content is split into fragments, embedded
//! with fastembed-rs and ranked by cosine similarity against the query.
//!
//! # Architecture
//!
//! - `chunker`: Splits tables, JSON trees and free text into fragments
//! - `embeddings`: Embedding provider contract and the fastembed wrapper
//! - `builder`: Embeds fragments into an immutable index
//! - `index`: Index type, cosine similarity and ranking
//! - `cache`: Content-addressed binary persistence of built indexes
//! - `search`: Query ranking and latest-request-wins sessions
//! - `directory`: Cross-file index over a directory listing
//! - `service`: High-level semantic search service

pub mod builder;
pub mod cache;
pub mod chunker;
pub mod directory;
pub mod embeddings;
pub mod index;
pub mod search;
pub mod service;

pub use builder::IndexBuilder;
pub use cache::{CacheRecord, ContentHash, IndexCache};
pub use chunker::{chunk, chunk_for_directory, ChunkOptions, Fragment, Location};
pub use directory::{DirectoryIndex, DirectoryIndexer};
pub use embeddings::{
    EmbeddingError, EmbeddingProvider, FastEmbedProvider, ModelStatus, StatusKind,
};
pub use index::{cosine_similarity, Index, IndexEntry, IndexError, IndexSlot, SearchResult};
pub use search::{SearchEngine, SearchSequencer, SearchSession, SearchTicket};
pub use service::{SearchStatus, SemanticSearchError, SemanticSearchService};
