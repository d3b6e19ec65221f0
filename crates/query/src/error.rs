use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueryError>;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("collection missing: {0}")]
    CollectionMissing(String),

    #[error("dimension mismatch: query embeds to {actual}, collection expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("cache expired")]
    CacheExpired,

    #[error(transparent)]
    Embedding(#[from] cidx_embedding::EmbeddingError),

    #[error(transparent)]
    Fts(#[from] cidx_fts::FtsError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

impl From<cidx_vector_store::VectorStoreError> for QueryError {
    fn from(err: cidx_vector_store::VectorStoreError) -> Self {
        use cidx_vector_store::VectorStoreError as E;
        match err {
            E::CollectionMissing(path) => Self::CollectionMissing(path),
            E::DimensionMismatch { expected, actual } => {
                Self::DimensionMismatch { expected, actual }
            }
            other => Self::Internal(other.to_string()),
        }
    }
}
