//! Immutable in-memory vector index with cosine similarity ranking.
//!
//! An `Index` is built once from embedded fragments and never patched.
//! Content changes produce a new `Index`, published through `IndexSlot`.

use std::cmp::Ordering;
use std::sync::{Arc, RwLock};

use rayon::prelude::*;
use serde::Serialize;

use crate::semantic::chunker::Fragment;

/// A fragment and its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub fragment: Fragment,
    pub embedding: Vec<f32>,
}

impl IndexEntry {
    pub fn new(fragment: Fragment, embedding: Vec<f32>) -> Self {
        Self {
            fragment,
            embedding,
        }
    }
}

/// Ordered entries sharing a single model and dimensionality.
#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    model_id: String,
    dimensions: usize,
    entries: Vec<IndexEntry>,
}

/// Search result from the index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub fragment: Fragment,
    /// Cosine similarity score (-1.0 to 1.0)
    pub score: f32,
    /// Position of the entry in the index
    pub ordinal: usize,
}

impl Index {
    /// Build an index, rejecting entries whose dimensionality differs from the first.
    pub fn new(model_id: impl Into<String>, entries: Vec<IndexEntry>) -> Result<Self, IndexError> {
        let dimensions = entries.first().map(|e| e.embedding.len()).unwrap_or(0);

        if let Some(bad) = entries.iter().find(|e| e.embedding.len() != dimensions) {
            return Err(IndexError::DimensionMismatch {
                expected: dimensions,
                got: bad.embedding.len(),
            });
        }

        Ok(Self {
            model_id: model_id.into(),
            dimensions,
            entries,
        })
    }

    pub fn empty(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            dimensions: 0,
            entries: Vec::new(),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Embedding dimensionality, 0 for an empty index.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.iter()
    }

    /// Concatenate two indexes built by the same model.
    pub fn merge(self, other: Index) -> Result<Index, IndexError> {
        if self.model_id != other.model_id {
            return Err(IndexError::ModelMismatch {
                expected: self.model_id,
                got: other.model_id,
            });
        }
        if self.is_empty() {
            return Ok(other);
        }
        if other.is_empty() {
            return Ok(self);
        }
        if self.dimensions != other.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: other.dimensions,
            });
        }

        let mut entries = self.entries;
        entries.extend(other.entries);
        Ok(Index {
            model_id: self.model_id,
            dimensions: self.dimensions,
            entries,
        })
    }

    /// Score every entry against `query` and return the best `top_k`.
    ///
    /// Results are sorted by descending score; equal scores keep index order.
    pub fn rank(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchResult>, IndexError> {
        if !self.is_empty() && query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .par_iter()
            .enumerate()
            .map(|(ordinal, entry)| (ordinal, cosine_similarity(query, &entry.embedding)))
            .collect();

        // sort_by is stable, so ties stay in ordinal order
        scored.sort_by(|a, b| descending(a.1, b.1));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(ordinal, score)| SearchResult {
                fragment: self.entries[ordinal].fragment.clone(),
                score,
                ordinal,
            })
            .collect())
    }
}

fn descending(a: f32, b: f32) -> Ordering {
    b.total_cmp(&a)
}

/// Compute L2 norm of a vector.
fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity in [-1, 1]. Zero when either vector has zero norm or
/// the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a < f32::EPSILON || norm_b < f32::EPSILON {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    (dot_product / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Holds the currently published index. Readers get the old or the new
/// index, never a partially built one.
#[derive(Default)]
pub struct IndexSlot {
    current: RwLock<Option<Arc<Index>>>,
}

impl IndexSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, index: Arc<Index>) {
        match self.current.write() {
            Ok(mut guard) => *guard = Some(index),
            Err(poisoned) => *poisoned.into_inner() = Some(index),
        }
    }

    pub fn current(&self) -> Option<Arc<Index>> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn clear(&self) {
        match self.current.write() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Model mismatch: index built with {expected}, got {got}")]
    ModelMismatch { expected: String, got: String },
}
