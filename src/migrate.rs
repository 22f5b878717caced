use anyhow::Result;
use sqlx::SqlitePool;

/// Create the record-store schema. Idempotent; safe to run on every start.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Append-only conversation transcript
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chat_messages (
            id TEXT PRIMARY KEY,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Ingestion ledger, keyed by filename
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingested_files (
            id TEXT PRIMARY KEY,
            filename TEXT NOT NULL UNIQUE,
            file_path TEXT NOT NULL,
            uploaded_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chat_messages_created_at ON chat_messages(created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
