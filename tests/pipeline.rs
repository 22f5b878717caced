//! End-to-end ingestion and retrieval tests against the in-memory index.
//!
//! Uses a deterministic bag-of-words embedder so similarity is exact-match
//! driven: identical text embeds to the identical vector.

use anyhow::Result;
use async_trait::async_trait;
use std::io::Write;
use std::sync::Arc;

use parley::config::IngestionConfig;
use parley::embedding::EmbeddingProvider;
use parley::index::memory::MemoryIndex;
use parley::index::VectorIndex;
use parley::ingest::{build_chunks, run_ingest};
use parley::models::{IndexedPassage, PassagePayload};
use parley::retrieval::RetrievalService;
use parley::{db, migrate};

const DIMS: usize = 32;

/// Hashes words into buckets and normalizes; identical text gives cosine 1.0.
struct StubEmbedder;

#[async_trait]
impl EmbeddingProvider for StubEmbedder {
    fn model_name(&self) -> &str {
        "stub"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; DIMS];
        for word in text.split_whitespace() {
            let mut h: usize = 5381;
            for b in word.bytes() {
                h = h.wrapping_mul(33).wrapping_add(b as usize);
            }
            v[h % DIMS] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        Ok(v)
    }
}

/// Always fails; stands in for a provider outage.
struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        anyhow::bail!("embedding backend unavailable")
    }
}

async fn test_pool(dir: &tempfile::TempDir) -> sqlx::SqlitePool {
    let pool = db::connect(&dir.path().join("test.sqlite")).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    pool
}

fn docs_dir_with(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::TempDir::new().unwrap();
    for (name, content) in files {
        let mut f = std::fs::File::create(dir.path().join(name)).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }
    dir
}

fn ingestion_config(folder: &std::path::Path) -> IngestionConfig {
    IngestionConfig {
        folder: folder.to_path_buf(),
        max_chunk_size: 10,
        overlap_size: 2,
    }
}

fn numbered_words(n: usize) -> String {
    (0..n)
        .map(|i| format!("word{i}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[tokio::test]
async fn ingest_then_retrieve_finds_the_right_chunk() {
    let db_dir = tempfile::TempDir::new().unwrap();
    let pool = test_pool(&db_dir).await;
    let docs = docs_dir_with(&[("notes.txt", &numbered_words(30))]);
    let config = ingestion_config(docs.path());

    let index = MemoryIndex::new();
    let report = run_ingest(&config, &pool, &index, &StubEmbedder)
        .await
        .unwrap();
    assert_eq!(report.files_ingested, 1);
    assert_eq!(report.passages_written, 4);

    // Query with the exact text of the second chunk.
    let chunks = build_chunks(&numbered_words(30), "notes.txt", 10, 2);
    let target = chunks[1].text.clone();

    let retrieval = RetrievalService::new(Arc::new(index), Arc::new(StubEmbedder));
    let matches = retrieval.query(&target, 1, 0.5).await.unwrap();

    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].filename, "notes.txt");
    assert_eq!(matches[0].text, target);
    assert!(matches[0].score > 0.99);
}

#[tokio::test]
async fn reingesting_the_same_folder_writes_nothing_new() {
    let db_dir = tempfile::TempDir::new().unwrap();
    let pool = test_pool(&db_dir).await;
    let docs = docs_dir_with(&[("notes.txt", &numbered_words(30))]);
    let config = ingestion_config(docs.path());
    let index = MemoryIndex::new();

    run_ingest(&config, &pool, &index, &StubEmbedder)
        .await
        .unwrap();
    let passages_after_first = index.len();

    let report = run_ingest(&config, &pool, &index, &StubEmbedder)
        .await
        .unwrap();
    assert_eq!(report.files_ingested, 0);
    assert_eq!(report.files_skipped, 1);
    assert_eq!(index.len(), passages_after_first);
}

#[tokio::test]
async fn failed_file_is_retried_on_the_next_run() {
    let db_dir = tempfile::TempDir::new().unwrap();
    let pool = test_pool(&db_dir).await;
    let docs = docs_dir_with(&[("notes.txt", &numbered_words(30))]);
    let config = ingestion_config(docs.path());
    let index = MemoryIndex::new();

    let report = run_ingest(&config, &pool, &index, &FailingEmbedder)
        .await
        .unwrap();
    assert_eq!(report.files_failed, 1);
    assert_eq!(report.files_ingested, 0);

    // The file was never recorded, so a healthy rerun picks it up.
    let report = run_ingest(&config, &pool, &index, &StubEmbedder)
        .await
        .unwrap();
    assert_eq!(report.files_ingested, 1);
    assert_eq!(report.passages_written, 4);
}

#[tokio::test]
async fn unsupported_files_are_skipped_not_failed() {
    let db_dir = tempfile::TempDir::new().unwrap();
    let pool = test_pool(&db_dir).await;
    let docs = docs_dir_with(&[
        ("notes.txt", &numbered_words(30)),
        ("image.png", "not really a png"),
    ]);
    let config = ingestion_config(docs.path());
    let index = MemoryIndex::new();

    let report = run_ingest(&config, &pool, &index, &StubEmbedder)
        .await
        .unwrap();
    assert_eq!(report.files_seen, 2);
    assert_eq!(report.files_ingested, 1);
    assert_eq!(report.files_skipped, 1);
    assert_eq!(report.files_failed, 0);
}

#[tokio::test]
async fn retrieval_honors_top_k_and_threshold() {
    let index = MemoryIndex::new();
    let embedder = StubEmbedder;
    index.ensure_collection(DIMS).await.unwrap();

    let texts = ["alpha beta gamma", "alpha beta delta", "unrelated words here"];
    let mut passages = Vec::new();
    for (i, text) in texts.iter().enumerate() {
        passages.push(IndexedPassage {
            id: format!("p{i}"),
            vector: embedder.embed(text).await.unwrap(),
            payload: PassagePayload {
                filename: format!("f{i}.txt"),
                chunk_index: 0,
                text: text.to_string(),
                total_chunks: 1,
            },
        });
    }
    index.upsert(&passages).await.unwrap();

    let retrieval = RetrievalService::new(Arc::new(index), Arc::new(StubEmbedder));

    // top_k caps the result count; ordering is best first.
    let matches = retrieval.query("alpha beta gamma", 2, 0.0).await.unwrap();
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].text, "alpha beta gamma");
    assert!(matches[0].score >= matches[1].score);

    // A high threshold keeps only the exact match.
    let matches = retrieval.query("alpha beta gamma", 5, 0.95).await.unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].text, "alpha beta gamma");
}
