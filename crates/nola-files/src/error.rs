use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilesError {
    #[error("file with id {0} already exists")]
    DuplicateId(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("malformed stored data: {0}")]
    Serialization(String),
}
