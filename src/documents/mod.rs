// Source documents and the chunks derived from them

#[cfg(test)]
mod tests;

use std::sync::LazyLock;

use fancy_regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::embeddings::chunking::{ChunkingConfig, ChunkingError, estimate_token_count, split};

/// Markdown left over from crawled pages, applied in order
static MARKDOWN_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        // images
        (Regex::new(r"!\[[^\]\n]*\]\([^)\n]*\)").expect("valid regex"), ""),
        // script links and links without text
        (
            Regex::new(r"\[[^\]\n]*\]\(javascript:[^)\n]*\)").expect("valid regex"),
            "",
        ),
        (Regex::new(r"\[\s*\]\([^)\n]*\)").expect("valid regex"), ""),
        // remaining links keep their text
        (
            Regex::new(r"\[([^\]\n]*)\]\([^)\n]*\)").expect("valid regex"),
            "${1}",
        ),
        (Regex::new(r"[#`*]+").expect("valid regex"), ""),
        (Regex::new(r"\n{3,}").expect("valid regex"), "\n\n"),
    ]
});

/// Strip markdown syntax from crawled text before it is chunked.
///
/// Images, `javascript:` links and empty links are dropped, other links are
/// replaced by their text, heading, emphasis and code markers are removed and
/// runs of blank lines collapse to one paragraph break.
#[inline]
pub fn clean_text(text: &str) -> String {
    let cleaned = MARKDOWN_PATTERNS
        .iter()
        .fold(text.to_string(), |acc, (regex, replacement)| {
            regex.replace_all(&acc, *replacement).into_owned()
        });
    cleaned.trim().to_string()
}

/// One record of an ingestion file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// Reasons a line of an NDJSON file cannot become a [`Document`]
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Malformed document record: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Document id is empty")]
    EmptyId,
    #[error("Document {0} has no text")]
    EmptyText(String),
}

/// Fixed-shape metadata carried by every chunk of a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub id: String,
    pub url: Option<String>,
    pub title: Option<String>,
}

/// A bounded slice of a document's text, the unit of embedding and retrieval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub parent_id: String,
    pub sequence: u32,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub token_count: u32,
}

impl Document {
    /// Parse one NDJSON line.
    ///
    /// Blank text and empty ids are rejected here so that the caller can
    /// treat them the same way as unparsable lines.
    #[inline]
    pub fn parse_line(line: &str) -> Result<Self, DocumentError> {
        let document: Self = serde_json::from_str(line)?;

        if document.id.trim().is_empty() {
            return Err(DocumentError::EmptyId);
        }
        if document.text.trim().is_empty() {
            return Err(DocumentError::EmptyText(document.id));
        }

        Ok(document)
    }

    /// Copy of this document with [`clean_text`] applied to its text
    #[inline]
    pub fn cleaned(&self) -> Result<Self, DocumentError> {
        let text = clean_text(&self.text);
        if text.is_empty() {
            return Err(DocumentError::EmptyText(self.id.clone()));
        }

        Ok(Self {
            text,
            ..self.clone()
        })
    }

    #[inline]
    pub fn metadata(&self) -> ChunkMetadata {
        ChunkMetadata {
            id: self.id.clone(),
            url: self.url.clone(),
            title: self.title.clone(),
        }
    }

    /// Split this document into overlapping chunks
    #[inline]
    pub fn chunk(&self, config: &ChunkingConfig) -> Result<Vec<Chunk>, ChunkingError> {
        let metadata = self.metadata();

        let chunks = split(&self.text, config.chunk_size, config.chunk_overlap)?
            .into_iter()
            .enumerate()
            .map(|(sequence, text)| Chunk {
                parent_id: self.id.clone(),
                sequence: saturating_u32(sequence),
                token_count: saturating_u32(estimate_token_count(&text)),
                text,
                metadata: metadata.clone(),
            })
            .collect();

        Ok(chunks)
    }
}

impl Chunk {
    /// Key under which this chunk is stored in a vector index.
    ///
    /// Stable for a given document id and sequence, which is what makes
    /// re-ingestion overwrite rather than duplicate.
    #[inline]
    pub fn key(&self) -> String {
        chunk_key(&self.parent_id, self.sequence)
    }
}

fn saturating_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

#[inline]
pub fn chunk_key(parent_id: &str, sequence: u32) -> String {
    format!("{}-chunk-{}", parent_id, sequence)
}
