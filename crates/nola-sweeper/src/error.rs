use thiserror::Error;

#[derive(Debug, Error)]
pub enum SweeperError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
