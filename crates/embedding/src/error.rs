use thiserror::Error;

pub type Result<T> = std::result::Result<T, EmbeddingError>;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Transient provider failure (5xx, timeout, connection loss); eligible
    /// for backoff retry.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Permanent provider failure; retrying will not help.
    #[error("provider error: {0}")]
    Provider(String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("cancelled")]
    Cancelled,
}

impl EmbeddingError {
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
