use sqlx::SqlitePool;
use tracing::debug;

use crate::error::StoreError;

/// Creates the `files` and `transcription_tasks` tables and their indexes if they
/// do not already exist. Safe to call on every startup.
pub(crate) async fn migrate(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            id           TEXT PRIMARY KEY,
            filename     TEXT NOT NULL,
            path         TEXT NOT NULL,
            size         INTEGER NOT NULL,
            content_type TEXT NOT NULL,
            created_at   TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transcription_tasks (
            id               TEXT PRIMARY KEY,
            file_id          TEXT NOT NULL REFERENCES files(id),
            status           TEXT NOT NULL,
            priority         INTEGER NOT NULL,
            retry_count      INTEGER NOT NULL,
            max_retries      INTEGER NOT NULL,
            worker_id        TEXT,
            started_at       TEXT,
            last_heartbeat   TEXT,
            timeout_seconds  INTEGER NOT NULL,
            progress         REAL NOT NULL,
            duration         REAL,
            segments         TEXT,
            error            TEXT,
            created_at       TEXT NOT NULL,
            completed_at     TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_queue ON transcription_tasks(status, priority DESC, created_at ASC)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_worker ON transcription_tasks(worker_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_heartbeat ON transcription_tasks(last_heartbeat)")
        .execute(pool)
        .await?;

    debug!("schema migration complete");
    Ok(())
}

/// Confirms the linked SQLite supports `UPDATE ... RETURNING` (SQLite >= 3.35),
/// which the queue's atomic claim primitive depends on.
pub(crate) async fn check_returning_support(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query("CREATE TEMP TABLE IF NOT EXISTS _nola_returning_probe (id INTEGER PRIMARY KEY)")
        .execute(pool)
        .await?;

    let result = sqlx::query("UPDATE _nola_returning_probe SET id = id WHERE 0 RETURNING id")
        .execute(pool)
        .await;

    sqlx::query("DROP TABLE IF EXISTS _nola_returning_probe")
        .execute(pool)
        .await?;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db_err)) if is_syntax_error(db_err.message()) => {
            Err(StoreError::VersionTooOld)
        }
        Err(other) => Err(StoreError::Database(other)),
    }
}

fn is_syntax_error(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("syntax error") || lower.contains("returning")
}
