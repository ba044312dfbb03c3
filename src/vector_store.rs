//! # VectorStore
//!
//! Persistent similarity index over every message ever exchanged.
//!
//! The store keeps three positionally aligned arrays: external identifiers
//! (`"<conversation_id>:<message_position>"`), the exact texts that were
//! embedded, and the embedding vectors themselves. They only ever grow
//! together; there is no per-entry mutation or deletion.
//!
//! Queries are exact: every stored vector is scanned and scored by squared
//! Euclidean distance (smaller is more similar). The scan is parallelised
//! with rayon, which is plenty for the intended workload of thousands to low
//! millions of short entries.
//!
//! ## Persistence layout
//! Two files side by side, derived from the base path passed to [`VectorStore::open`]:
//! - `<base>.vectors`: bincode-encoded dimension + vector data.
//! - `<base>.json`: ids and texts.
//!
//! Every [`add`](VectorStore::add) rewrites both files in full, via a
//! write-then-rename so a crash never leaves a torn file behind. The full
//! rewrite makes write cost linear in index size; that is a known ceiling of
//! this design, not an accident.
//!
//! ## Quick example
//! ```no_run
//! use memchat::embeddings::MiniLmEmbedder;
//! use memchat::vector_store::VectorStore;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let embedder = MiniLmEmbedder::load()?;
//! let mut store = VectorStore::open("/tmp/vector_store", Box::new(embedder))?;
//! store.add("abc123:0", "Rust is great!")?;
//! let hits = store.search("I love Rust!", 1)?;
//! println!("nearest: {} at {}", hits[0].external_id, hits[0].distance);
//! # Ok(()) }
//! ```

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

use crate::embeddings::{EmbeddingError, EmbeddingProvider};

/// Errors raised by the similarity index.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    /// The two persisted files disagree on how many entries exist.
    #[error("corrupt index: {vectors} stored vectors but {entries} metadata entries")]
    CorruptIndex { vectors: usize, entries: usize },

    /// An embedding came back with the wrong length for this index.
    #[error("dimension mismatch: index holds {expected}-d vectors, embedding was {actual}-d")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The binary vector file could not be encoded or decoded.
    #[error("vector file encoding: {0}")]
    VectorCodec(String),

    #[error("metadata file encoding: {0}")]
    MetadataCodec(#[from] serde_json::Error),
}

/// One nearest-neighbour result.
///
/// `distance` is squared Euclidean: zero means an identical embedding,
/// larger means less similar.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub external_id: String,
    pub text: String,
    pub distance: f32,
}

/// Binary half of the persisted pair.
#[derive(Serialize, Deserialize)]
struct VectorData {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
}

/// JSON half of the persisted pair.
#[derive(Serialize, Deserialize)]
struct IndexMetadata {
    ids: Vec<String>,
    texts: Vec<String>,
}

/// Append-only nearest-neighbour index with on-disk durability.
pub struct VectorStore {
    path: PathBuf,
    provider: Box<dyn EmbeddingProvider>,
    dimension: usize,
    vectors: Vec<Vec<f32>>,
    ids: Vec<String>,
    texts: Vec<String>,
}

impl VectorStore {
    /// Open the index at `path`, loading persisted state when both backing
    /// files exist, otherwise starting empty with the provider's dimension.
    ///
    /// # Errors
    /// - [`VectorStoreError::CorruptIndex`] if the persisted files are
    ///   inconsistent in length.
    /// - I/O or codec errors while reading either file.
    pub fn open(
        path: impl Into<PathBuf>,
        provider: Box<dyn EmbeddingProvider>,
    ) -> Result<Self, VectorStoreError> {
        let path = path.into();
        let vectors_path = Self::vectors_path_for(&path);
        let metadata_path = Self::metadata_path_for(&path);

        if vectors_path.exists() && metadata_path.exists() {
            let bytes = fs::read(&vectors_path)?;
            let (data, _): (VectorData, usize) =
                bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                    .map_err(|e| VectorStoreError::VectorCodec(e.to_string()))?;

            let metadata: IndexMetadata =
                serde_json::from_str(&fs::read_to_string(&metadata_path)?)?;

            if data.vectors.len() != metadata.ids.len()
                || metadata.ids.len() != metadata.texts.len()
            {
                return Err(VectorStoreError::CorruptIndex {
                    vectors: data.vectors.len(),
                    entries: metadata.ids.len().min(metadata.texts.len()),
                });
            }

            debug!(entries = data.vectors.len(), "loaded vector store");

            Ok(Self {
                path,
                provider,
                dimension: data.dimension,
                vectors: data.vectors,
                ids: metadata.ids,
                texts: metadata.texts,
            })
        } else {
            let dimension = provider.dimension();
            Ok(Self {
                path,
                provider,
                dimension,
                vectors: Vec::new(),
                ids: Vec::new(),
                texts: Vec::new(),
            })
        }
    }

    /// Number of indexed entries.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Embed `text`, append it under `external_id`, and persist the whole
    /// index to disk.
    ///
    /// Identifiers are assigned by the caller and expected to be unique and
    /// monotonic; the store does not police them.
    ///
    /// # Errors
    /// Embedding, dimension, or persistence failures. On error nothing is
    /// appended: the three arrays stay aligned.
    pub fn add(&mut self, external_id: &str, text: &str) -> Result<(), VectorStoreError> {
        let vector = self.provider.embed(text)?;
        if vector.len() != self.dimension {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        self.vectors.push(vector);
        self.ids.push(external_id.to_string());
        self.texts.push(text.to_string());

        if let Err(err) = self.persist() {
            // roll back the append so memory and disk cannot drift apart
            self.vectors.pop();
            self.ids.pop();
            self.texts.pop();
            return Err(err);
        }

        Ok(())
    }

    /// Return the `k` entries nearest to `query_text`, ascending by squared
    /// Euclidean distance.
    ///
    /// `k` is clamped to the current entry count; an empty index yields an
    /// empty result rather than an error.
    pub fn search(&self, query_text: &str, k: usize) -> Result<Vec<SearchHit>, VectorStoreError> {
        if self.is_empty() {
            return Ok(Vec::new());
        }

        let query = self.provider.embed(query_text)?;
        if query.len() != self.dimension {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .par_iter()
            .enumerate()
            .map(|(i, v)| (i, squared_euclidean(&query, v)))
            .collect();

        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(k.min(self.len()));

        Ok(scored
            .into_iter()
            .map(|(i, distance)| SearchHit {
                external_id: self.ids[i].clone(),
                text: self.texts[i].clone(),
                distance,
            })
            .collect())
    }

    /// Rewrite both backing files. Each file is written to a temp file in the
    /// same directory and renamed into place, so a prior good copy is never
    /// clobbered by a partial write.
    fn persist(&self) -> Result<(), VectorStoreError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&dir)?;

        let data = VectorData {
            dimension: self.dimension,
            vectors: self.vectors.clone(),
        };
        let encoded = bincode::serde::encode_to_vec(&data, bincode::config::standard())
            .map_err(|e| VectorStoreError::VectorCodec(e.to_string()))?;
        write_atomic(&dir, &Self::vectors_path_for(&self.path), &encoded)?;

        let metadata = IndexMetadata {
            ids: self.ids.clone(),
            texts: self.texts.clone(),
        };
        let encoded = serde_json::to_vec(&metadata)?;
        write_atomic(&dir, &Self::metadata_path_for(&self.path), &encoded)?;

        Ok(())
    }

    fn vectors_path_for(base: &Path) -> PathBuf {
        base.with_extension("vectors")
    }

    fn metadata_path_for(base: &Path) -> PathBuf {
        base.with_extension("json")
    }
}

fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> Result<(), VectorStoreError> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashEmbedder;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> VectorStore {
        VectorStore::open(dir.path().join("vector_store"), Box::new(HashEmbedder::new())).unwrap()
    }

    #[test]
    fn added_text_is_its_own_nearest_neighbour() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);
        store.add("chat-1:0", "what is borrow checking").unwrap();

        let hits = store.search("what is borrow checking", 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].external_id, "chat-1:0");
        assert!(hits[0].distance.abs() < 1e-6);
    }

    #[test]
    fn k_is_clamped_to_entry_count() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);
        store.add("a:0", "alpha").unwrap();
        store.add("a:1", "beta").unwrap();

        let hits = store.search("alpha", 50).unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn results_are_ordered_by_ascending_distance() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);
        store.add("a:0", "completely unrelated topic").unwrap();
        store.add("a:1", "rust lifetimes explained").unwrap();
        store.add("a:2", "rust lifetimes").unwrap();

        let hits = store.search("rust lifetimes", 3).unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits[0].distance <= hits[1].distance);
        assert!(hits[1].distance <= hits[2].distance);
        assert_eq!(hits[0].external_id, "a:2");
    }

    #[test]
    fn empty_index_returns_no_hits() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        assert!(store.search("anything", 5).unwrap().is_empty());
    }

    #[test]
    fn entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = open_store(&dir);
            store.add("c:0", "persistent memory").unwrap();
            store.add("c:1", "volatile memory").unwrap();
        }

        let store = open_store(&dir);
        assert_eq!(store.len(), 2);
        let hits = store.search("persistent memory", 1).unwrap();
        assert_eq!(hits[0].external_id, "c:0");
        assert!(hits[0].distance.abs() < 1e-6);
    }

    #[test]
    fn mismatched_files_are_rejected_as_corrupt() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("vector_store");
        {
            let mut store = VectorStore::open(&base, Box::new(HashEmbedder::new())).unwrap();
            store.add("c:0", "one entry").unwrap();
        }

        // drop the entry from the metadata file only
        let metadata_path = base.with_extension("json");
        std::fs::write(&metadata_path, r#"{"ids":[],"texts":[]}"#).unwrap();

        let result = VectorStore::open(&base, Box::new(HashEmbedder::new()));
        assert!(matches!(
            result,
            Err(VectorStoreError::CorruptIndex { vectors: 1, entries: 0 })
        ));
    }
}
