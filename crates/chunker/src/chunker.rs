use crate::config::ChunkerConfig;
use crate::error::{ChunkerError, Result};
use crate::types::TextChunk;
use unicode_segmentation::UnicodeSegmentation;

/// Fixed-size text chunker with overlap.
///
/// Chunks are measured in grapheme clusters, so a boundary never splits a
/// multibyte sequence or a combining-mark cluster. Semantic (AST-aware)
/// boundaries are intentionally not attempted.
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Split `content` into overlapping chunks with byte and line ranges.
    pub fn chunk_str(&self, content: &str) -> Result<Vec<TextChunk>> {
        if content.is_empty() {
            return Err(ChunkerError::EmptyContent);
        }

        // Grapheme boundaries plus the cumulative newline count at each one.
        let mut offsets: Vec<usize> = Vec::new();
        let mut newlines: Vec<usize> = Vec::new();
        let mut seen_newlines = 0usize;
        for (byte_idx, grapheme) in content.grapheme_indices(true) {
            offsets.push(byte_idx);
            newlines.push(seen_newlines);
            seen_newlines += grapheme.matches('\n').count();
        }
        offsets.push(content.len());
        newlines.push(seen_newlines);

        let total = offsets.len() - 1;
        let size = self.config.chunk_size_chars;
        let step = size - self.config.overlap_chars;

        let mut chunks = Vec::new();
        let mut start = 0usize;
        loop {
            let end = (start + size).min(total);
            let byte_start = offsets[start];
            let byte_end = offsets[end];
            chunks.push(TextChunk {
                content: content[byte_start..byte_end].to_string(),
                chunk_index: chunks.len(),
                byte_start,
                byte_end,
                line_start: newlines[start] + 1,
                line_end: newlines[end] + 1,
            });
            if end == total {
                break;
            }
            start += step;
        }

        log::debug!(
            "Chunked {} graphemes into {} chunks (size={}, overlap={})",
            total,
            chunks.len(),
            size,
            self.config.overlap_chars
        );
        Ok(chunks)
    }
}
