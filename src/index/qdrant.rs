//! Qdrant vector index backend over the REST API.
//!
//! Uses three endpoints: `PUT /collections/{name}` (create),
//! `PUT /collections/{name}/points` (upsert), and
//! `POST /collections/{name}/points/search`. The search request carries the
//! score threshold, so filtering happens index-side.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use super::VectorIndex;
use crate::config::IndexConfig;
use crate::models::{IndexedPassage, PassagePayload, ScoredPassage};

pub struct QdrantIndex {
    client: reqwest::Client,
    base_url: String,
    collection: String,
}

impl QdrantIndex {
    pub fn new(config: &IndexConfig, collection: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: collection.to_string(),
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn ensure_collection(&self, dims: usize) -> Result<()> {
        // Already present?
        let resp = self.client.get(self.collection_url()).send().await?;
        if resp.status().is_success() {
            return Ok(());
        }

        let body = serde_json::json!({
            "vectors": { "size": dims, "distance": "Cosine" }
        });
        let resp = self
            .client
            .put(self.collection_url())
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("Qdrant create collection failed ({}): {}", status, text);
        }
        Ok(())
    }

    async fn upsert(&self, passages: &[IndexedPassage]) -> Result<()> {
        if passages.is_empty() {
            return Ok(());
        }

        let points: Vec<serde_json::Value> = passages
            .iter()
            .map(|p| {
                serde_json::json!({
                    "id": p.id,
                    "vector": p.vector,
                    "payload": {
                        "filename": p.payload.filename,
                        "chunk_index": p.payload.chunk_index,
                        "text": p.payload.text,
                        "total_chunks": p.payload.total_chunks,
                    }
                })
            })
            .collect();

        let resp = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&serde_json::json!({ "points": points }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("Qdrant upsert failed ({}): {}", status, text);
        }
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<ScoredPassage>> {
        let body = serde_json::json!({
            "vector": vector,
            "limit": limit,
            "score_threshold": score_threshold,
            "with_payload": true,
        });

        let resp = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("Qdrant search failed ({}): {}", status, text);
        }

        let json: serde_json::Value = resp.json().await?;
        parse_search_response(&json)
    }
}

fn parse_search_response(json: &serde_json::Value) -> Result<Vec<ScoredPassage>> {
    let hits = json
        .get("result")
        .and_then(|r| r.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Qdrant response: missing result array"))?;

    let mut out = Vec::with_capacity(hits.len());
    for hit in hits {
        let score = hit
            .get("score")
            .and_then(|s| s.as_f64())
            .ok_or_else(|| anyhow::anyhow!("Invalid Qdrant response: missing score"))?
            as f32;
        let payload: PassagePayload = serde_json::from_value(
            hit.get("payload")
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("Invalid Qdrant response: missing payload"))?,
        )?;
        out.push(ScoredPassage { score, payload });
    }
    Ok(out)
}
