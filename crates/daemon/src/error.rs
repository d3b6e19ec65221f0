use thiserror::Error;

pub type Result<T> = std::result::Result<T, DaemonError>;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("rpc error: {0}")]
    Rpc(cidx_protocol::RpcError),

    #[error(transparent)]
    Indexer(#[from] cidx_indexer::IndexerError),

    #[error(transparent)]
    Query(#[from] cidx_query::QueryError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
