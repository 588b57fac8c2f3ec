//! Flat vector index with cosine similarity search and on-disk snapshots.
//!
//! The whole index lives in memory as an insertion-ordered list of entries and
//! is searched exhaustively. It is persisted as a single JSON snapshot that is
//! written next to its final location and renamed into place, so a reader
//! always sees a complete snapshot.

use crate::chunking::Chunk;
use crate::embeddings::Embedding;
use crate::error::{RagError, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Number of entries retrieved per query unless configured otherwise
pub const DEFAULT_TOP_K: usize = 2;

const SNAPSHOT_FILE: &str = "index.json";
const SNAPSHOT_TMP_FILE: &str = "index.json.tmp";
const SNAPSHOT_VERSION: u32 = 1;

/// A chunk paired with its embedding, the unit stored and searched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: Embedding,
}

/// A search hit
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntry {
    pub entry: IndexEntry,
    /// Cosine similarity to the query, higher is more relevant
    pub score: f32,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    embedding_model: &'a str,
    dimension: Option<usize>,
    entries: &'a [IndexEntry],
}

#[derive(Deserialize)]
struct Snapshot {
    version: u32,
    embedding_model: String,
    dimension: Option<usize>,
    entries: Vec<IndexEntry>,
}

/// In-memory vector index
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    embedding_model: String,
    dimension: Option<usize>,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Create an empty index for vectors produced by `embedding_model`
    pub fn new(embedding_model: impl Into<String>) -> Self {
        VectorIndex {
            embedding_model: embedding_model.into(),
            dimension: None,
            entries: Vec::new(),
        }
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    /// Vector dimension, fixed by the first added entry
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
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

    /// Append entries in order.
    ///
    /// The whole batch is rejected with [`RagError::ConfigMismatch`] if any
    /// vector is empty, holds a NaN or infinite value, or its dimension
    /// differs from the index dimension.
    pub fn add(&mut self, entries: Vec<IndexEntry>) -> Result<()> {
        let mut dimension = self.dimension;
        for entry in &entries {
            let dim = entry.embedding.dimension();
            if dim == 0 {
                return Err(RagError::ConfigMismatch(format!(
                    "empty embedding for chunk {} of {}",
                    entry.chunk.metadata.chunk_index, entry.chunk.metadata.file_name
                )));
            }
            if entry.embedding.values.iter().any(|v| !v.is_finite()) {
                return Err(RagError::ConfigMismatch(format!(
                    "non-finite embedding value for chunk {} of {}",
                    entry.chunk.metadata.chunk_index, entry.chunk.metadata.file_name
                )));
            }
            match dimension {
                Some(expected) if expected != dim => {
                    return Err(RagError::ConfigMismatch(format!(
                        "embedding dimension {} does not match index dimension {}",
                        dim, expected
                    )));
                }
                Some(_) => {}
                None => dimension = Some(dim),
            }
        }

        self.dimension = dimension;
        self.entries.extend(entries);
        Ok(())
    }

    /// Return the `k` entries most similar to `query`, best first.
    ///
    /// Equal scores keep insertion order. An empty index yields no results.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredEntry>> {
        let Some(dimension) = self.dimension else {
            return Ok(Vec::new());
        };
        if query.len() != dimension {
            return Err(RagError::ConfigMismatch(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                dimension
            )));
        }
        if query.iter().any(|v| !v.is_finite()) {
            return Err(RagError::ConfigMismatch(
                "query embedding contains non-finite values".to_string(),
            ));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, cosine_similarity(query, &entry.embedding.values)))
            .collect();

        // sort_by is stable, so ties stay in insertion order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        debug!(
            "Retrieved {} of {} entries, scores {:?}",
            scored.len(),
            self.entries.len(),
            scored.iter().map(|(_, score)| *score).collect::<Vec<_>>()
        );

        Ok(scored
            .into_iter()
            .map(|(i, score)| ScoredEntry {
                entry: self.entries[i].clone(),
                score,
            })
            .collect())
    }

    /// Path of the snapshot file inside a persist directory
    pub fn snapshot_path(dir: &Path) -> PathBuf {
        dir.join(SNAPSHOT_FILE)
    }

    /// Whether a snapshot exists in `dir`
    pub fn exists(dir: &Path) -> bool {
        Self::snapshot_path(dir).is_file()
    }

    /// Write the index to `dir`, replacing any previous snapshot atomically
    pub fn persist(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;

        let snapshot = SnapshotRef {
            version: SNAPSHOT_VERSION,
            embedding_model: &self.embedding_model,
            dimension: self.dimension,
            entries: &self.entries,
        };
        let json = serde_json::to_vec(&snapshot)?;

        let tmp_path = dir.join(SNAPSHOT_TMP_FILE);
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, Self::snapshot_path(dir))?;

        info!("Persisted {} index entries to {}", self.entries.len(), dir.display());
        Ok(())
    }

    /// Restore an index previously written by [`persist`](VectorIndex::persist)
    pub fn load(dir: &Path) -> Result<Self> {
        let path = Self::snapshot_path(dir);
        if !path.is_file() {
            return Err(RagError::NotFound(format!(
                "no index snapshot at {}",
                path.display()
            )));
        }

        let content = fs::read(&path)?;
        let snapshot: Snapshot = serde_json::from_slice(&content)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(RagError::ConfigMismatch(format!(
                "unsupported index snapshot version {} (expected {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }

        let mut index = VectorIndex::new(snapshot.embedding_model);
        index.add(snapshot.entries)?;
        if snapshot.dimension.is_some() && index.dimension != snapshot.dimension {
            return Err(RagError::ConfigMismatch(format!(
                "index snapshot declares dimension {:?} but stores {:?}",
                snapshot.dimension, index.dimension
            )));
        }

        info!("Loaded {} index entries from {}", index.len(), dir.display());
        Ok(index)
    }
}

/// Compute cosine similarity between two vectors of equal length.
///
/// Returns 0.0 if either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
