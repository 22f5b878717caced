//! Semantic retrieval over the vector index.
//!
//! Stateless: embeds the query text and asks the index for ranked hits. Safe
//! to call concurrently from multiple turns or tools. No deduplication across
//! overlapping chunks and no re-ranking — a single-pass similarity search.
//! The score threshold is enforced by the index (see [`crate::index`]).

use anyhow::Result;
use std::sync::Arc;

use crate::embedding::EmbeddingProvider;
use crate::index::VectorIndex;
use crate::models::PassageMatch;

pub struct RetrievalService {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl RetrievalService {
    pub fn new(index: Arc<dyn VectorIndex>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { index, embedder }
    }

    /// Return at most `top_k` passages ranked by descending similarity, none
    /// scoring below `score_threshold`.
    pub async fn query(
        &self,
        text: &str,
        top_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<PassageMatch>> {
        let vector = self.embedder.embed(text).await?;
        let hits = self.index.search(&vector, top_k, score_threshold).await?;

        Ok(hits
            .into_iter()
            .map(|hit| PassageMatch {
                text: hit.payload.text,
                filename: hit.payload.filename,
                score: hit.score,
            })
            .collect())
    }
}
