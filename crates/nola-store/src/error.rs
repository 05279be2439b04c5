use thiserror::Error;

/// Errors surfaced by [`crate::SqliteStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error(
        "linked SQLite does not support UPDATE ... RETURNING (requires SQLite >= 3.35)"
    )]
    VersionTooOld,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
