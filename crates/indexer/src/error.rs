use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("embedding fingerprint changed ({0}); run a clear reindex")]
    FingerprintMismatch(String),

    #[error("indexing cancelled")]
    Cancelled,

    #[error("git error: {0}")]
    Git(String),

    #[error(transparent)]
    VectorStore(#[from] cidx_vector_store::VectorStoreError),

    #[error(transparent)]
    Embedding(#[from] cidx_embedding::EmbeddingError),

    #[error(transparent)]
    Fts(#[from] cidx_fts::FtsError),

    #[error(transparent)]
    Chunker(#[from] cidx_chunker::ChunkerError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}
