mod branch;
mod cache;
mod engine;
mod error;
mod filters;
mod fusion;
mod truncate;

pub use branch::BranchContext;
pub use cache::{CacheConfig, CachePage, EvictorHandle, PayloadCache};
pub use engine::{QueryEngine, QueryEngineConfig, QueryRequest, QueryResponse, QueryResult};
pub use error::{QueryError, Result};
pub use filters::{PathPredicate, QueryFilters, TimeRange};
pub use truncate::truncate_payload;

pub use cidx_vector_store::Payload;
