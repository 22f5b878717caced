//! Ingestion pipeline orchestration.
//!
//! Drives the per-file flow: dedup check → extraction → chunking → embedding
//! → vector upsert → ledger record. Files are processed sequentially in name
//! order; chunks are embedded one call at a time.
//!
//! Failure semantics: any embedding or upsert failure is caught and logged,
//! and the file is left unrecorded so the next run retries it from scratch.
//! Passages upserted before the failure are not rolled back — the upsert and
//! the ledger write are two independent writes, and duplicate passages after
//! a retried partial failure are an accepted consequence.

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::chunk::split_with_overlap;
use crate::config::IngestionConfig;
use crate::embedding::EmbeddingProvider;
use crate::extract::{extract_file, ExtractError};
use crate::index::VectorIndex;
use crate::models::{DocumentChunk, IndexedPassage, IngestedFileRecord, PassagePayload};
use crate::store;

/// Counters describing one ingestion run.
#[derive(Debug, Default, Clone, Copy)]
pub struct IngestReport {
    pub files_seen: usize,
    pub files_ingested: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub passages_written: usize,
}

/// Ingest every file in the configured folder.
///
/// At-most-once per filename: a file whose name is already in the ledger is
/// skipped without looking at its content.
pub async fn run_ingest(
    config: &IngestionConfig,
    pool: &SqlitePool,
    index: &dyn VectorIndex,
    embedder: &dyn EmbeddingProvider,
) -> Result<IngestReport> {
    index.ensure_collection(embedder.dims()).await?;

    let mut entries: Vec<std::path::PathBuf> = std::fs::read_dir(&config.folder)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    entries.sort();

    let mut report = IngestReport::default();

    for path in entries {
        report.files_seen += 1;
        let filename = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => {
                warn!("Skipping file with non-UTF-8 name: {}", path.display());
                report.files_skipped += 1;
                continue;
            }
        };

        if store::is_ingested(pool, &filename).await? {
            debug!("File {} already ingested, skipping", filename);
            report.files_skipped += 1;
            continue;
        }

        let text = match extract_file(&path) {
            Ok(text) => text,
            Err(ExtractError::UnsupportedExtension(ext)) => {
                warn!("Unsupported file type '{}' for {}, skipping", ext, filename);
                report.files_skipped += 1;
                continue;
            }
            Err(e) => {
                error!("Extraction failed for {}: {}", filename, e);
                report.files_failed += 1;
                continue;
            }
        };

        let chunks = build_chunks(&text, &filename, config.max_chunk_size, config.overlap_size);

        match ingest_chunks(&chunks, index, embedder).await {
            Ok(count) => {
                let record = IngestedFileRecord::new(&filename, path.display().to_string());
                store::record_ingested(pool, &record).await?;
                info!(
                    "Ingested {} chunks from file: {}",
                    count, filename
                );
                report.files_ingested += 1;
                report.passages_written += count;
            }
            Err(e) => {
                // File stays unrecorded; the next run retries it wholesale.
                error!("Error ingesting file {}: {}", filename, e);
                report.files_failed += 1;
            }
        }
    }

    Ok(report)
}

/// Split extracted text into provenance-tagged chunks.
pub fn build_chunks(
    text: &str,
    filename: &str,
    max_chunk_size: usize,
    overlap_size: usize,
) -> Vec<DocumentChunk> {
    let pieces = split_with_overlap(text, max_chunk_size, overlap_size);
    let total = pieces.len();
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, text)| DocumentChunk {
            text,
            source_filename: filename.to_string(),
            chunk_index: i,
            total_chunks: total,
        })
        .collect()
}

/// Embed chunks one at a time, then upsert all passages for the file at once.
async fn ingest_chunks(
    chunks: &[DocumentChunk],
    index: &dyn VectorIndex,
    embedder: &dyn EmbeddingProvider,
) -> Result<usize> {
    let mut passages = Vec::with_capacity(chunks.len());

    for chunk in chunks {
        let vector = embedder.embed(&chunk.text).await?;
        passages.push(IndexedPassage {
            id: Uuid::new_v4().to_string(),
            vector,
            payload: PassagePayload {
                filename: chunk.source_filename.clone(),
                chunk_index: chunk.chunk_index,
                text: chunk.text.clone(),
                total_chunks: chunk.total_chunks,
            },
        });
    }

    index.upsert(&passages).await?;
    Ok(passages.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_chunks_tags_provenance() {
        let words: Vec<String> = (0..25).map(|i| format!("w{i}")).collect();
        let text = words.join(" ");
        let chunks = build_chunks(&text, "report.pdf", 10, 2);
        assert_eq!(chunks.len(), 4);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
            assert_eq!(chunk.total_chunks, 4);
            assert_eq!(chunk.source_filename, "report.pdf");
        }
    }

    #[test]
    fn build_chunks_empty_text() {
        assert!(build_chunks("", "empty.txt", 10, 2).is_empty());
    }
}
