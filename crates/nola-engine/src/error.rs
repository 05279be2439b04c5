use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("source file not found: {0}")]
    FileNotFound(String),

    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),
}
