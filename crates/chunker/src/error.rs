use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChunkerError>;

#[derive(Debug, Error)]
pub enum ChunkerError {
    #[error("content is empty")]
    EmptyContent,

    #[error("invalid chunker configuration: {0}")]
    InvalidConfig(String),
}
