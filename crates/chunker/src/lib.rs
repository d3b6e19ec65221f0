mod chunker;
mod config;
mod error;
mod language;
mod types;

pub use chunker::Chunker;
pub use config::ChunkerConfig;
pub use error::{ChunkerError, Result};
pub use language::language_for_path;
pub use types::TextChunk;
