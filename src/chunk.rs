//! Overlap-window text chunker.
//!
//! Splits extracted document text into word-aligned chunks of at most
//! `max_chunk_size` words, each window overlapping the previous one by
//! `overlap_size` words. Boundaries are word-aligned only; there is no
//! sentence or paragraph awareness. Deterministic for the same input and
//! parameters.

/// Split text into overlapping word windows.
///
/// Words are whitespace-separated; empty input yields no chunks. The window
/// advances by `max_chunk_size - overlap_size` words. When
/// `overlap_size >= max_chunk_size` the step would be zero or negative, so
/// after the first window the position jumps to end-of-input: exactly one
/// chunk is produced.
pub fn split_with_overlap(text: &str, max_chunk_size: usize, overlap_size: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() || max_chunk_size == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut position = 0usize;
    while position < words.len() {
        let end = (position + max_chunk_size).min(words.len());
        chunks.push(words[position..end].join(" "));
        if overlap_size >= max_chunk_size {
            // Degenerate overlap: a non-positive step would loop forever.
            position = words.len();
        } else {
            position += max_chunk_size - overlap_size;
        }
    }

    chunks
}
