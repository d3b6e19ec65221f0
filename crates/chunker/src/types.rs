use serde::{Deserialize, Serialize};

/// A fixed-size slice of a source file.
///
/// Byte offsets index into the original content; line numbers are 1-based
/// and best-effort (a chunk boundary inside a line reports that line on
/// both sides of the boundary).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    pub content: String,
    pub chunk_index: usize,
    pub byte_start: usize,
    pub byte_end: usize,
    pub line_start: usize,
    pub line_end: usize,
}

impl TextChunk {
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}
