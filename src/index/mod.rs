//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait defines the two operations the pipeline needs:
//! write-once passage upserts and ranked similarity search. Backends:
//! [`qdrant::QdrantIndex`] over the Qdrant REST API, and [`memory::MemoryIndex`]
//! for tests and offline use.
//!
//! The score threshold is part of the `search` contract: no hit below the
//! threshold is returned by any implementation, so callers never post-filter.

pub mod memory;
pub mod qdrant;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{IndexedPassage, ScoredPassage};

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the collection if it does not exist. Idempotent.
    async fn ensure_collection(&self, dims: usize) -> Result<()>;

    /// Insert passages. Ids are caller-assigned; passages are never updated.
    async fn upsert(&self, passages: &[IndexedPassage]) -> Result<()>;

    /// Ranked similarity search: at most `limit` hits, descending score,
    /// none below `score_threshold`.
    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<ScoredPassage>>;
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`; `0.0` for empty vectors or vectors of
/// different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }
}
