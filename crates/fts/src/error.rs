use thiserror::Error;

pub type Result<T> = std::result::Result<T, FtsError>;

#[derive(Debug, Error)]
pub enum FtsError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("index error: {0}")]
    Index(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<tantivy::TantivyError> for FtsError {
    fn from(err: tantivy::TantivyError) -> Self {
        Self::Index(err.to_string())
    }
}
