use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::data::{repository, Store};
use crate::error::AppError;

pub const SIMILARITY_THRESHOLD: f32 = 0.35;
pub const SEMANTIC_TOP_K: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct CachedVector {
    pub file_id: i64,
    pub chunk_index: usize,
    pub data: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorMatch {
    pub file_id: i64,
    pub score: f32,
}

pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decodes little-endian f32s; a trailing partial value is ignored.
pub fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Dot product. Equal to cosine similarity for unit-norm inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn normalize_l2(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Best chunk score per file above the threshold, highest first, at most `top_k`.
pub fn best_matches(entries: &[CachedVector], query: &[f32], top_k: usize) -> Vec<VectorMatch> {
    let mut best: HashMap<i64, f32> = HashMap::new();
    for entry in entries {
        let score = cosine_similarity(&entry.data, query);
        if score < SIMILARITY_THRESHOLD {
            continue;
        }
        best.entry(entry.file_id)
            .and_modify(|s| *s = s.max(score))
            .or_insert(score);
    }

    let mut matches: Vec<VectorMatch> = best
        .into_iter()
        .map(|(file_id, score)| VectorMatch { file_id, score })
        .collect();
    matches.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.file_id.cmp(&b.file_id))
    });
    matches.truncate(top_k);
    matches
}

/// In-memory mirror of every stored vector.
///
/// Readers clone the inner `Arc`, so a rebuild swaps the whole slice at once.
#[derive(Default)]
pub struct VectorIndex {
    entries: RwLock<Arc<Vec<CachedVector>>>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<Vec<CachedVector>> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn replace(&self, entries: Vec<CachedVector>) {
        let next = Arc::new(entries);
        let mut guard = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = next;
    }

    /// Loads all vectors from the store and swaps them in.
    ///
    /// Rows come back in insertion order; the newest row's dimension is the current
    /// model's, and rows left over from an earlier model are dropped.
    pub fn reload(&self, store: &Store) -> Result<usize, AppError> {
        let mut loaded = store.with_conn(repository::load_all_vectors)?;
        if let Some(dim) = loaded.last().map(|v| v.data.len()) {
            let before = loaded.len();
            loaded.retain(|v| v.data.len() == dim && dim > 0);
            if loaded.len() != before {
                warn!(dropped = before - loaded.len(), dim, "vectors with mismatched dimension");
            }
        }
        let count = loaded.len();
        self.replace(loaded);
        debug!(count, "vector index reloaded");
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn search(&self, query: &[f32]) -> Vec<VectorMatch> {
        let entries = self.snapshot();
        best_matches(&entries, query, SEMANTIC_TOP_K)
    }
}
