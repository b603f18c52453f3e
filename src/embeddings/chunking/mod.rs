
use std::iter;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Configuration for text chunking
///
/// Both sizes are measured in characters (Unicode scalar values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum length of a chunk
    pub chunk_size: usize,
    /// Length of the region shared by adjacent chunks
    pub chunk_overlap: usize,
    /// Strip markdown from document text before splitting it
    pub clean_markdown: bool,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            clean_markdown: true,
        }
    }
}

impl ChunkingConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ChunkingError> {
        validate_sizes(self.chunk_size, self.chunk_overlap)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkingError {
    #[error("Chunk size must be greater than zero")]
    ZeroChunkSize,
    #[error("Chunk overlap ({overlap}) must be smaller than chunk size ({size})")]
    OverlapTooLarge { size: usize, overlap: usize },
}

/// Places where a chunk may end, coarsest first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    Paragraph,
    Sentence,
    Whitespace,
}

impl Boundary {
    const HIERARCHY: [Self; 3] = [Self::Paragraph, Self::Sentence, Self::Whitespace];

    /// Whether a chunk ending right before `chars[pos]` ends on this boundary
    fn is_at(self, chars: &[char], pos: usize) -> bool {
        match self {
            Self::Paragraph => pos >= 2 && chars[pos - 1] == '\n' && chars[pos - 2] == '\n',
            Self::Sentence => {
                pos >= 2
                    && chars[pos - 1].is_whitespace()
                    && matches!(chars[pos - 2], '.' | '!' | '?')
            }
            Self::Whitespace => pos >= 1 && chars[pos - 1].is_whitespace(),
        }
    }
}

/// Split text into overlapping chunks of at most `chunk_size` characters
///
/// Every chunk is a verbatim slice of `text`, and each chunk after the first
/// starts inside the last `chunk_overlap` characters of its predecessor.
/// Empty text produces no chunks; text that fits in one chunk is returned
/// unchanged.
#[inline]
pub fn split(
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Vec<String>, ChunkingError> {
    let spans = split_spans(text, chunk_size, chunk_overlap)?;

    let byte_offsets = text
        .char_indices()
        .map(|(offset, _)| offset)
        .chain(iter::once(text.len()))
        .collect::<Vec<_>>();

    #[expect(clippy::string_slice, reason = "offsets come from char_indices")]
    let chunks = spans
        .into_iter()
        .map(|span| text[byte_offsets[span.start]..byte_offsets[span.end]].to_string())
        .collect::<Vec<_>>();

    debug!(
        "Split {} chars into {} chunks (size {}, overlap {})",
        byte_offsets.len() - 1,
        chunks.len(),
        chunk_size,
        chunk_overlap
    );

    Ok(chunks)
}

/// Same walk as [`split`], returned as character ranges into `text`
#[inline]
pub fn split_spans(
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Vec<Range<usize>>, ChunkingError> {
    validate_sizes(chunk_size, chunk_overlap)?;

    let chars = text.chars().collect::<Vec<_>>();
    let len = chars.len();
    let mut spans = Vec::new();
    let mut start = 0;

    while start < len {
        let limit = start + chunk_size;
        if limit >= len {
            spans.push(start..len);
            break;
        }

        // Ending past start + overlap keeps the next start ahead of this one
        let end = find_chunk_end(&chars, start + chunk_overlap + 1, limit);
        spans.push(start..end);
        start = find_next_start(&chars, end, chunk_overlap);
    }

    Ok(spans)
}

fn validate_sizes(chunk_size: usize, chunk_overlap: usize) -> Result<(), ChunkingError> {
    if chunk_size == 0 {
        return Err(ChunkingError::ZeroChunkSize);
    }
    if chunk_overlap >= chunk_size {
        return Err(ChunkingError::OverlapTooLarge {
            size: chunk_size,
            overlap: chunk_overlap,
        });
    }
    Ok(())
}

/// Last boundary in `lowest..=limit` of the coarsest level that has one
fn find_chunk_end(chars: &[char], lowest: usize, limit: usize) -> usize {
    Boundary::HIERARCHY
        .iter()
        .find_map(|boundary| {
            (lowest..=limit)
                .rev()
                .find(|&pos| boundary.is_at(chars, pos))
        })
        .unwrap_or(limit)
}

/// First word start inside the overlap window, or the raw window start
fn find_next_start(chars: &[char], end: usize, chunk_overlap: usize) -> usize {
    let from = end - chunk_overlap;
    (from..end)
        .find(|&pos| Boundary::Whitespace.is_at(chars, pos) && !chars[pos].is_whitespace())
        .unwrap_or(from)
}

/// Estimate token count using a simple heuristic
/// This is a rough approximation - actual tokenization would be more accurate
#[inline]
pub fn estimate_token_count(text: &str) -> usize {
    // Rough heuristic: 1 token ≈ 0.75 words for English text
    let word_count = text.split_whitespace().count();
    let punct_count = text.chars().filter(|c| c.is_ascii_punctuation()).count();

    (punct_count as f64).mul_add(0.1, word_count as f64 / 0.75) as usize
}
