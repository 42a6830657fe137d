//! Flat cosine-similarity vector store with disk persistence.
//!
//! Brute-force KNN over normalised vectors, persisted via bincode. The
//! dimension is fixed at open time; an embedding-model change requires a
//! re-index (the pipeline drops the file and rebuilds).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{QuarryError, QuarryResult};

#[derive(Serialize, Deserialize, Default)]
struct Persisted {
    dimension: usize,
    entries: Vec<(String, Vec<f32>)>,
}

/// Flat vector index keyed by document id.
pub struct VectorStore {
    path: Option<PathBuf>,
    dimension: usize,
    entries: Vec<(String, Vec<f32>)>,
    by_id: HashMap<String, usize>,
}

impl VectorStore {
    /// Open or create a store at `path` with the given dimension.
    ///
    /// A persisted file with a different dimension is discarded; the
    /// caller is expected to re-embed.
    pub fn open(path: &Path, dimension: usize) -> QuarryResult<Self> {
        let mut store = Self {
            path: Some(path.to_path_buf()),
            dimension,
            entries: Vec::new(),
            by_id: HashMap::new(),
        };
        if path.exists() {
            let bytes = std::fs::read(path)?;
            match bincode::deserialize::<Persisted>(&bytes) {
                Ok(p) if p.dimension == dimension => {
                    for (i, (id, _)) in p.entries.iter().enumerate() {
                        store.by_id.insert(id.clone(), i);
                    }
                    store.entries = p.entries;
                }
                Ok(p) => {
                    tracing::warn!(
                        stored = p.dimension,
                        configured = dimension,
                        "vector store dimension mismatch, starting empty"
                    );
                }
                Err(e) => {
                    tracing::warn!(error = %e, "vector store unreadable, starting empty");
                }
            }
        }
        Ok(store)
    }

    /// Create an in-memory store (tests).
    pub fn in_memory(dimension: usize) -> Self {
        Self { path: None, dimension, entries: Vec::new(), by_id: HashMap::new() }
    }

    /// Insert or replace a vector.
    pub fn upsert(&mut self, id: &str, vector: &[f32]) -> QuarryResult<()> {
        if vector.len() != self.dimension {
            return Err(QuarryError::Embedding {
                message: format!(
                    "vector dimension {} does not match index dimension {}",
                    vector.len(),
                    self.dimension
                ),
            });
        }
        match self.by_id.get(id) {
            Some(&idx) => self.entries[idx].1 = vector.to_vec(),
            None => {
                self.by_id.insert(id.to_string(), self.entries.len());
                self.entries.push((id.to_string(), vector.to_vec()));
            }
        }
        Ok(())
    }

    /// Remove a vector by id.
    pub fn remove(&mut self, id: &str) {
        if let Some(idx) = self.by_id.remove(id) {
            self.entries.swap_remove(idx);
            if idx < self.entries.len() {
                let moved = self.entries[idx].0.clone();
                self.by_id.insert(moved, idx);
            }
        }
    }

    /// K nearest neighbours by cosine similarity, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(String, f32)> {
        if query.len() != self.dimension || k == 0 {
            return Vec::new();
        }
        let mut scored: Vec<(String, f32)> = self
            .entries
            .iter()
            .map(|(id, v)| (id.clone(), cosine(query, v)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    /// Persist to disk (no-op for in-memory stores).
    pub fn save(&self) -> QuarryResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let persisted = Persisted {
            dimension: self.dimension,
            entries: self.entries.clone(),
        };
        let bytes = bincode::serialize(&persisted)
            .map_err(|e| QuarryError::Serialization(e.to_string()))?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0;
    let mut na = 0.0;
    let mut nb = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    let denom = na.sqrt() * nb.sqrt();
    if denom > 0.0 {
        dot / denom
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_search_remove() {
        let mut store = VectorStore::in_memory(3);
        store.upsert("a", &[1.0, 0.0, 0.0]).expect("upsert");
        store.upsert("b", &[0.0, 1.0, 0.0]).expect("upsert");
        store.upsert("c", &[0.9, 0.1, 0.0]).expect("upsert");

        let hits = store.search(&[1.0, 0.0, 0.0], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, "a");
        assert_eq!(hits[1].0, "c");

        store.remove("a");
        let hits = store.search(&[1.0, 0.0, 0.0], 2);
        assert_eq!(hits[0].0, "c");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let mut store = VectorStore::in_memory(3);
        let err = store.upsert("a", &[1.0, 0.0]);
        assert!(err.is_err());
    }

    #[test]
    fn persistence_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("vectors.bin");
        {
            let mut store = VectorStore::open(&path, 2).expect("open");
            store.upsert("a", &[0.6, 0.8]).expect("upsert");
            store.save().expect("save");
        }
        let store = VectorStore::open(&path, 2).expect("reopen");
        assert_eq!(store.len(), 1);
        let hits = store.search(&[0.6, 0.8], 1);
        assert_eq!(hits[0].0, "a");
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn dimension_change_discards() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("vectors.bin");
        {
            let mut store = VectorStore::open(&path, 2).expect("open");
            store.upsert("a", &[0.6, 0.8]).expect("upsert");
            store.save().expect("save");
        }
        let store = VectorStore::open(&path, 4).expect("reopen larger");
        assert!(store.is_empty());
    }
}
