//! SQLite record store: the append-only transcript log and the ingestion
//! ledger.
//!
//! Transcript writes happen once per completed turn — both messages of the
//! turn in a single transaction, so a cancelled or failed turn persists
//! nothing.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::models::{ChatMessage, IngestedFileRecord, Role};

/// Load the full transcript, oldest first.
pub async fn load_transcript(pool: &SqlitePool) -> Result<Vec<ChatMessage>> {
    let rows = sqlx::query(
        "SELECT id, role, content FROM chat_messages ORDER BY created_at, rowid",
    )
    .fetch_all(pool)
    .await?;

    let mut messages = Vec::with_capacity(rows.len());
    for row in rows {
        let role_str: String = row.get("role");
        let role = Role::parse(&role_str)
            .ok_or_else(|| anyhow::anyhow!("Unknown role in transcript: {}", role_str))?;
        messages.push(ChatMessage {
            id: row.get("id"),
            role,
            content: row.get("content"),
        });
    }

    Ok(messages)
}

/// Persist one completed turn: the user message and the full assistant reply,
/// atomically. Called only after the reply stream finished.
pub async fn append_turn(
    pool: &SqlitePool,
    user: &ChatMessage,
    assistant: &ChatMessage,
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    let mut tx = pool.begin().await?;

    for msg in [user, assistant] {
        sqlx::query(
            "INSERT INTO chat_messages (id, role, content, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&msg.id)
        .bind(msg.role.as_str())
        .bind(&msg.content)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Whether a filename has already been ingested. Filename is the identity
/// key; content under an unchanged name is never re-checked.
pub async fn is_ingested(pool: &SqlitePool, filename: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ingested_files WHERE filename = ?")
        .bind(filename)
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

/// Record a filename as ingested. Written after the vector upsert succeeded;
/// the two writes are intentionally not one transaction.
pub async fn record_ingested(pool: &SqlitePool, record: &IngestedFileRecord) -> Result<()> {
    sqlx::query(
        "INSERT INTO ingested_files (id, filename, file_path, uploaded_at) VALUES (?, ?, ?, ?)",
    )
    .bind(&record.id)
    .bind(&record.filename)
    .bind(&record.file_path)
    .bind(record.uploaded_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Number of ingestion ledger entries.
pub async fn ingested_file_count(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ingested_files")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate;

    async fn test_pool() -> (tempfile::TempDir, SqlitePool) {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = db::connect(&dir.path().join("test.sqlite")).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        (dir, pool)
    }

    #[tokio::test]
    async fn transcript_round_trip_preserves_order() {
        let (_dir, pool) = test_pool().await;

        let u1 = ChatMessage::user("first question");
        let a1 = ChatMessage::assistant("first answer");
        append_turn(&pool, &u1, &a1).await.unwrap();

        let u2 = ChatMessage::user("second question");
        let a2 = ChatMessage::assistant("second answer");
        append_turn(&pool, &u2, &a2).await.unwrap();

        let transcript = load_transcript(&pool).await.unwrap();
        assert_eq!(transcript.len(), 4);
        assert_eq!(transcript[0].content, "first question");
        assert_eq!(transcript[1].content, "first answer");
        assert_eq!(transcript[2].content, "second question");
        assert_eq!(transcript[3].content, "second answer");
        assert_eq!(transcript[3].role, Role::Assistant);
    }

    #[tokio::test]
    async fn ingestion_ledger_tracks_filenames() {
        let (_dir, pool) = test_pool().await;

        assert!(!is_ingested(&pool, "a.pdf").await.unwrap());
        record_ingested(&pool, &IngestedFileRecord::new("a.pdf", "/docs/a.pdf"))
            .await
            .unwrap();
        assert!(is_ingested(&pool, "a.pdf").await.unwrap());
        assert!(!is_ingested(&pool, "b.pdf").await.unwrap());
        assert_eq!(ingested_file_count(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_filename_record_is_rejected() {
        let (_dir, pool) = test_pool().await;

        record_ingested(&pool, &IngestedFileRecord::new("a.pdf", "/docs/a.pdf"))
            .await
            .unwrap();
        let err = record_ingested(&pool, &IngestedFileRecord::new("a.pdf", "/other/a.pdf")).await;
        assert!(err.is_err());
    }
}
