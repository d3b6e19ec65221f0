use thiserror::Error;

pub type Result<T> = std::result::Result<T, VectorStoreError>;

#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("collection not found at {0}")]
    CollectionMissing(String),

    #[error("collection metadata mismatch: {0}")]
    MetaMismatch(String),

    #[error("projection matrix missing at {0}")]
    MatrixMissing(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid collection parameters: {0}")]
    InvalidConfig(String),

    #[error("point not found: {0}")]
    PointMissing(String),

    #[error("corrupt artifact at {path}: {detail}")]
    CorruptArtifact { path: String, detail: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}
