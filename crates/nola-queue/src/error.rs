use thiserror::Error;

/// Errors surfaced by [`crate::TaskQueue`].
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("task with id {0} already exists")]
    DuplicateId(String),

    #[error("file with id {0} does not exist")]
    UnknownFile(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("malformed segments payload: {0}")]
    Serialization(#[from] serde_json::Error),
}
