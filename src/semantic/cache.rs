//! Content-addressed persistence for built indexes.
//!
//! Record format (one blob per key `index-<model tag>-<content hash>.bin`):
//!
//! Header (87 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - content_hash: [u8; 32] (SHA256 of the canonical content)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - created_at: i64 (unix seconds, little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated):
//! - fragment_len: u32 (little-endian)
//! - fragment: JSON bytes
//! - embedding: [f32; dimensions] (little-endian)
//!
//! Trailer:
//! - checksum: u32 (CRC32 of all entry bytes)
//!
//! Every failure is absorbed: a bad record reads as a miss, a failed write
//! is logged and dropped.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};

use crate::content::Content;
use crate::semantic::chunker::Fragment;
use crate::semantic::embeddings::model_id_hash;
use crate::semantic::index::{Index, IndexEntry};
use crate::storage::StorageManager;

/// Current record format version
const FORMAT_VERSION: u8 = 1;

/// version(1) + model_id(32) + content_hash(32) + dimensions(2) + entry_count(8) + created_at(8) + checksum(4)
const HEADER_SIZE: usize = 87;

const KEY_PREFIX: &str = "index-";

/// SHA-256 of the exact content that was indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn of(content: &Content) -> Self {
        Self::of_str(&content.canonical_string())
    }

    pub fn of_str(canonical: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Errors that can occur while reading or writing a record.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid record format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: record version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: record uses different model")]
    ModelMismatch,

    #[error("Content hash mismatch: record is for different content")]
    ContentMismatch,

    #[error("Checksum mismatch: record may be corrupted")]
    ChecksumMismatch,

    #[error("Fragment decode error: {0}")]
    Fragment(#[from] serde_json::Error),
}

/// A stored index with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord {
    pub content_hash: ContentHash,
    pub index: Index,
    pub created_at: DateTime<Utc>,
}

pub struct IndexCache {
    store: Arc<dyn StorageManager>,
    model_id: String,
    model_hash: [u8; 32],
}

impl IndexCache {
    pub fn new(store: Arc<dyn StorageManager>, model_id: impl Into<String>) -> Self {
        let model_id = model_id.into();
        let model_hash = model_id_hash(&model_id);
        Self {
            store,
            model_id,
            model_hash,
        }
    }

    /// Storage key for a content hash under the current model.
    pub fn key(&self, hash: &ContentHash) -> String {
        let tag: String = self.model_hash[..4].iter().map(|b| format!("{b:02x}")).collect();
        format!("{KEY_PREFIX}{tag}-{hash}.bin")
    }

    /// Look up a cached index. Any storage or decoding failure is a miss.
    pub fn get(&self, hash: &ContentHash) -> Option<Index> {
        self.get_record(hash).map(|record| record.index)
    }

    pub fn get_record(&self, hash: &ContentHash) -> Option<CacheRecord> {
        let key = self.key(hash);
        if !self.store.exists(&key) {
            return None;
        }

        match self.store.read(&key).map_err(CacheError::from).and_then(|bytes| {
            decode_record(&bytes, &self.model_id, &self.model_hash, hash)
        }) {
            Ok(record) => {
                log::debug!("cache hit {key} ({} entries)", record.index.len());
                Some(record)
            }
            Err(e) => {
                log::debug!("cache miss {key}: {e}");
                None
            }
        }
    }

    /// Store an index. Failures are logged and otherwise ignored.
    pub fn put(&self, hash: &ContentHash, index: &Index) {
        let key = self.key(hash);
        let result = encode_record(index, &self.model_hash, hash, Utc::now())
            .and_then(|bytes| self.store.write(&key, &bytes).map_err(CacheError::from));

        if let Err(e) = result {
            log::warn!("Failed to cache index {key}: {e}");
        }
    }

    /// Delete every cached index, for all models.
    pub fn clear(&self) -> usize {
        let mut removed = 0;
        for key in self.store.list() {
            if !key.starts_with(KEY_PREFIX) {
                continue;
            }
            match self.store.delete(&key) {
                Ok(()) => removed += 1,
                Err(e) => log::warn!("Failed to delete cached index {key}: {e}"),
            }
        }
        removed
    }
}

fn encode_record(
    index: &Index,
    model_hash: &[u8; 32],
    content_hash: &ContentHash,
    created_at: DateTime<Utc>,
) -> Result<Vec<u8>, CacheError> {
    let dimensions = u16::try_from(index.dimensions()).map_err(|_| {
        CacheError::InvalidFormat(format!("{} dimensions do not fit", index.dimensions()))
    })?;

    let mut header = [0u8; HEADER_SIZE];
    header[0] = FORMAT_VERSION;
    header[1..33].copy_from_slice(model_hash);
    header[33..65].copy_from_slice(content_hash.as_bytes());
    header[65..67].copy_from_slice(&dimensions.to_le_bytes());
    header[67..75].copy_from_slice(&(index.len() as u64).to_le_bytes());
    header[75..83].copy_from_slice(&created_at.timestamp().to_le_bytes());
    let checksum = crc32fast::hash(&header[0..83]);
    header[83..87].copy_from_slice(&checksum.to_le_bytes());

    let mut body = Vec::new();
    for entry in index.iter() {
        let fragment = serde_json::to_vec(&entry.fragment)?;
        body.extend_from_slice(&(fragment.len() as u32).to_le_bytes());
        body.extend_from_slice(&fragment);
        for &value in &entry.embedding {
            body.extend_from_slice(&value.to_le_bytes());
        }
    }

    let mut bytes = Vec::with_capacity(HEADER_SIZE + body.len() + 4);
    bytes.extend_from_slice(&header);
    bytes.extend_from_slice(&body);
    bytes.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    Ok(bytes)
}

fn decode_record(
    bytes: &[u8],
    model_id: &str,
    model_hash: &[u8; 32],
    expected_hash: &ContentHash,
) -> Result<CacheRecord, CacheError> {
    if bytes.len() < HEADER_SIZE + 4 {
        return Err(CacheError::InvalidFormat("record too short".to_string()));
    }

    let (header, rest) = bytes.split_at(HEADER_SIZE);

    // Version check first
    let version = header[0];
    if version != FORMAT_VERSION {
        return Err(CacheError::VersionMismatch(version, FORMAT_VERSION));
    }

    let stored_checksum = u32::from_le_bytes(array(&header[83..87])?);
    if crc32fast::hash(&header[0..83]) != stored_checksum {
        return Err(CacheError::ChecksumMismatch);
    }

    if header[1..33] != model_hash[..] {
        return Err(CacheError::ModelMismatch);
    }
    if header[33..65] != expected_hash.as_bytes()[..] {
        return Err(CacheError::ContentMismatch);
    }

    let dimensions = u16::from_le_bytes(array(&header[65..67])?) as usize;
    let entry_count = u64::from_le_bytes(array(&header[67..75])?);
    let created_at = i64::from_le_bytes(array(&header[75..83])?);

    let (body, trailer) = rest.split_at(rest.len() - 4);
    if crc32fast::hash(body) != u32::from_le_bytes(array(trailer)?) {
        return Err(CacheError::ChecksumMismatch);
    }

    let mut reader = ByteReader::new(body);
    let mut entries = Vec::new();
    for _ in 0..entry_count {
        let fragment_len = u32::from_le_bytes(array(reader.take(4)?)?) as usize;
        let fragment: Fragment = serde_json::from_slice(reader.take(fragment_len)?)?;

        let embedding = reader
            .take(dimensions * 4)?
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        entries.push(IndexEntry::new(fragment, embedding));
    }

    if !reader.is_done() {
        return Err(CacheError::InvalidFormat("trailing bytes after entries".to_string()));
    }

    let index = Index::new(model_id, entries)
        .map_err(|e| CacheError::InvalidFormat(e.to_string()))?;

    Ok(CacheRecord {
        content_hash: *expected_hash,
        index,
        created_at: Utc
            .timestamp_opt(created_at, 0)
            .single()
            .unwrap_or_default(),
    })
}

fn array<const N: usize>(slice: &[u8]) -> Result<[u8; N], CacheError> {
    slice
        .try_into()
        .map_err(|_| CacheError::InvalidFormat(format!("expected {N} bytes")))
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CacheError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| CacheError::InvalidFormat("truncated entry".to_string()))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn is_done(&self) -> bool {
        self.pos == self.bytes.len()
    }
}
