//! Core data models for Parley.
//!
//! These types flow through both halves of the system: chat messages through
//! the transcript store and history reducer, passages through the ingestion
//! and retrieval pipeline.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Speaker role for a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

/// One message in a conversation transcript. Immutable once appended to the
/// store; the transcript itself is append-only.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// A chunk of extracted document text, transient between extraction and
/// embedding.
#[derive(Debug, Clone)]
pub struct DocumentChunk {
    pub text: String,
    pub source_filename: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
}

/// Provenance payload stored alongside each vector in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassagePayload {
    pub filename: String,
    pub chunk_index: usize,
    pub text: String,
    pub total_chunks: usize,
}

/// A chunk plus its embedding, as written to the vector index. Created once
/// per chunk, never updated.
#[derive(Debug, Clone)]
pub struct IndexedPassage {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: PassagePayload,
}

/// A search hit returned from the vector index.
#[derive(Debug, Clone)]
pub struct ScoredPassage {
    pub score: f32,
    pub payload: PassagePayload,
}

/// A retrieval result handed back to callers (and tools).
#[derive(Debug, Clone, Serialize)]
pub struct PassageMatch {
    pub text: String,
    pub filename: String,
    pub score: f32,
}

/// Marks a filename as processed. The filename is the ingestion identity key:
/// content changes under an unchanged filename are never re-ingested.
#[derive(Debug, Clone)]
pub struct IngestedFileRecord {
    pub id: String,
    pub filename: String,
    pub file_path: String,
    pub uploaded_at: i64,
}

impl IngestedFileRecord {
    pub fn new(filename: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            filename: filename.into(),
            file_path: file_path.into(),
            uploaded_at: chrono::Utc::now().timestamp(),
        }
    }
}
