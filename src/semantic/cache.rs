//! Embedding cache keyed by transaction id.
//!
//! Every entry remembers the fingerprint of the document it was computed
//! from, so callers can tell a fresh vector from one that belongs to an
//! older version of the record.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::semantic::composite::document_fingerprint;
use crate::semantic::storage::{StoredVectors, VectorStorage, VectorStorageError};

/// A cached embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// SHA256 of the composite document that was embedded
    pub fingerprint: [u8; 32],
    /// The embedding vector
    pub embedding: Vec<f32>,
}

/// Outcome of a freshness-checked lookup.
#[derive(Debug, PartialEq)]
pub enum CacheLookup<'a> {
    /// Stored vector was computed from the same document
    Hit(&'a [f32]),
    /// Stored vector belongs to different document text
    Stale,
    Miss,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Dimension mismatch: cache holds {expected}-dimensional vectors, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Storage error: {0}")]
    Storage(#[from] VectorStorageError),
}

/// Identity of the model that produced the vectors, stored in the file header.
pub fn model_id_hash(provider: &str, model: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(provider.as_bytes());
    hasher.update(b":");
    hasher.update(model.as_bytes());
    hasher.finalize().into()
}

/// Embedding cache backed by a `VectorStorage` file.
///
/// Constructed once per process and passed by reference to the matching service.
pub struct EmbeddingCache {
    entries: HashMap<String, CacheEntry>,
    dimensions: Option<usize>,
    storage: VectorStorage,
    model_id: [u8; 32],
    dirty: bool,
}

impl EmbeddingCache {
    /// Open the cache, loading whatever the storage file holds for `model_id`.
    ///
    /// An incompatible or corrupted file is not fatal: the cache starts empty
    /// and the file is overwritten on the next persist.
    pub fn open(storage: VectorStorage, model_id: [u8; 32]) -> Result<Self, CacheError> {
        let mut cache = Self {
            entries: HashMap::new(),
            dimensions: None,
            storage,
            model_id,
            dirty: false,
        };
        cache.load_all()?;
        Ok(cache)
    }

    /// Replace in-memory state with the contents of the storage file,
    /// discarding anything not yet persisted.
    pub fn load_all(&mut self) -> Result<&HashMap<String, CacheEntry>, CacheError> {
        let stored = if self.storage.exists() {
            match self.storage.load(&self.model_id) {
                Ok(stored) => {
                    log::info!("Loaded {} cached embeddings", stored.entries.len());
                    stored
                }
                Err(VectorStorageError::ModelMismatch) => {
                    log::warn!("Embedding model changed, starting with an empty cache");
                    StoredVectors::default()
                }
                Err(VectorStorageError::VersionMismatch(file_ver, _)) => {
                    log::warn!("Cache version {file_ver} unsupported, starting with an empty cache");
                    StoredVectors::default()
                }
                Err(VectorStorageError::ChecksumMismatch | VectorStorageError::InvalidFormat(_)) => {
                    log::warn!(
                        "Cache file {} is corrupted, starting with an empty cache",
                        self.storage.path().display()
                    );
                    StoredVectors::default()
                }
                Err(e) => {
                    log::error!("Failed to load cached embeddings: {e}");
                    return Err(e.into());
                }
            }
        } else {
            log::debug!("No embedding cache on disk yet");
            StoredVectors::default()
        };

        self.dimensions = (!stored.entries.is_empty()).then_some(stored.dimensions);
        self.entries = stored.entries;
        self.dirty = false;

        Ok(&self.entries)
    }

    /// Write every entry to storage.
    ///
    /// No-op when nothing changed since the last load or persist.
    pub fn persist_all(&mut self) -> Result<(), CacheError> {
        if !self.dirty {
            return Ok(());
        }

        let dimensions = self.dimensions.unwrap_or_default();
        self.storage.save(&self.entries, dimensions, &self.model_id)?;
        self.dirty = false;

        log::debug!(
            "Persisted {} embeddings to {}",
            self.entries.len(),
            self.storage.path().display()
        );
        Ok(())
    }

    /// Vector stored for `id`, regardless of which document produced it.
    pub fn get(&self, id: &str) -> Option<&[f32]> {
        self.entries.get(id).map(|e| e.embedding.as_slice())
    }

    /// Vector stored for `id` if it was computed from exactly `document`.
    pub fn lookup(&self, id: &str, document: &str) -> CacheLookup<'_> {
        match self.entries.get(id) {
            Some(entry) if entry.fingerprint == document_fingerprint(document) => {
                CacheLookup::Hit(&entry.embedding)
            }
            Some(_) => CacheLookup::Stale,
            None => CacheLookup::Miss,
        }
    }

    pub fn put(&mut self, id: &str, document: &str, embedding: Vec<f32>) -> Result<(), CacheError> {
        match self.dimensions {
            Some(expected) if expected != embedding.len() => {
                return Err(CacheError::DimensionMismatch {
                    expected,
                    got: embedding.len(),
                });
            }
            Some(_) => {}
            None => self.dimensions = Some(embedding.len()),
        }

        self.entries.insert(
            id.to_string(),
            CacheEntry {
                fingerprint: document_fingerprint(document),
                embedding,
            },
        );
        self.dirty = true;
        Ok(())
    }

    pub fn invalidate(&mut self, id: &str) -> bool {
        let removed = self.entries.remove(id).is_some();
        if removed {
            self.dirty = true;
            if self.entries.is_empty() {
                self.dimensions = None;
            }
        }
        removed
    }

    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            self.entries.clear();
            self.dirty = true;
        }
        self.dimensions = None;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }
}
