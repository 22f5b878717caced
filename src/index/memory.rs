//! In-memory vector index.
//!
//! Brute-force cosine scan over a `Vec`. Used by the test suite and as an
//! offline fallback; behavior matches the Qdrant backend's contract
//! (descending score, limit cap, threshold filter).

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;

use super::{cosine_similarity, VectorIndex};
use crate::models::{IndexedPassage, ScoredPassage};

#[derive(Default)]
pub struct MemoryIndex {
    passages: Mutex<Vec<IndexedPassage>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored passages.
    pub fn len(&self) -> usize {
        self.passages.lock().expect("index lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn ensure_collection(&self, _dims: usize) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, passages: &[IndexedPassage]) -> Result<()> {
        let mut store = self.passages.lock().expect("index lock");
        store.extend_from_slice(passages);
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<ScoredPassage>> {
        let store = self.passages.lock().expect("index lock");
        let mut hits: Vec<ScoredPassage> = store
            .iter()
            .map(|p| ScoredPassage {
                score: cosine_similarity(&p.vector, vector),
                payload: p.payload.clone(),
            })
            .filter(|hit| hit.score >= score_threshold)
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PassagePayload;

    fn passage(id: &str, vector: Vec<f32>) -> IndexedPassage {
        IndexedPassage {
            id: id.to_string(),
            vector,
            payload: PassagePayload {
                filename: format!("{id}.txt"),
                chunk_index: 0,
                text: id.to_string(),
                total_chunks: 1,
            },
        }
    }

    #[tokio::test]
    async fn search_orders_caps_and_filters() {
        let index = MemoryIndex::new();
        index
            .upsert(&[
                passage("a", vec![1.0, 0.0]),
                passage("b", vec![0.9, 0.1]),
                passage("c", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let hits = index.search(&[1.0, 0.0], 2, 0.5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].score >= hits[1].score);
        assert_eq!(hits[0].payload.filename, "a.txt");
        assert!(hits.iter().all(|h| h.score >= 0.5));
    }

    #[tokio::test]
    async fn threshold_excludes_weak_matches() {
        let index = MemoryIndex::new();
        index
            .upsert(&[passage("a", vec![1.0, 0.0]), passage("c", vec![0.0, 1.0])])
            .await
            .unwrap();

        let hits = index.search(&[1.0, 0.0], 10, 0.9).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload.filename, "a.txt");
    }
}
