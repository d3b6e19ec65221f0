use crate::error::{ChunkerError, Result};
use serde::{Deserialize, Serialize};

/// Chunking parameters, counted in grapheme clusters so a chunk boundary
/// never lands inside a multibyte sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    pub chunk_size_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size_chars: 1000,
            overlap_chars: 150,
        }
    }
}

impl ChunkerConfig {
    /// Smaller chunks tuned for embedding-provider token budgets.
    #[must_use]
    pub fn for_embeddings() -> Self {
        Self {
            chunk_size_chars: 512,
            overlap_chars: 64,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size_chars == 0 {
            return Err(ChunkerError::InvalidConfig(
                "chunk_size_chars must be positive".to_string(),
            ));
        }
        if self.overlap_chars >= self.chunk_size_chars {
            return Err(ChunkerError::InvalidConfig(format!(
                "overlap_chars ({}) must be smaller than chunk_size_chars ({})",
                self.overlap_chars, self.chunk_size_chars
            )));
        }
        Ok(())
    }
}
