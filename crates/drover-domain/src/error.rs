use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("resource kind mismatch: expected {expected}, got {actual}")]
    KindMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
