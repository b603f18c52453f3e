// Embeddings module
// Text chunking and the embedding capability used by ingestion and retrieval

pub mod chunking;
pub mod ollama;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::RagError;

pub use chunking::{ChunkingConfig, ChunkingError, estimate_token_count, split, split_spans};
pub use ollama::OllamaClient;

/// The model and vector dimension every vector in an index was produced with
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmbeddingSpace {
    pub model: String,
    pub dimension: usize,
}

impl EmbeddingSpace {
    #[inline]
    pub fn new(model: impl Into<String>, dimension: usize) -> Self {
        Self {
            model: model.into(),
            dimension,
        }
    }
}

/// A fixed-length vector produced by an [`Embedder`]
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector {
    pub values: Vec<f32>,
}

impl EmbeddingVector {
    #[inline]
    pub fn dimension(&self) -> usize {
        self.values.len()
    }
}

impl From<Vec<f32>> for EmbeddingVector {
    #[inline]
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmbeddingError {
    /// Rate limits and network faults, already retried
    #[error("Transient embedding failure: {0}")]
    Transient(String),
    /// The service rejected this input; retrying will not help
    #[error("Embedding rejected: {0}")]
    Permanent(String),
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl EmbeddingError {
    #[inline]
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    #[inline]
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::DimensionMismatch { .. })
    }
}

impl From<EmbeddingError> for RagError {
    #[inline]
    fn from(error: EmbeddingError) -> Self {
        match error {
            EmbeddingError::DimensionMismatch { .. } => Self::Config(error.to_string()),
            _ => Self::Embedding(error.to_string()),
        }
    }
}

/// Converts text into vectors of one [`EmbeddingSpace`]
#[async_trait]
pub trait Embedder: Send + Sync {
    fn space(&self) -> &EmbeddingSpace;

    /// Embed every text, preserving order.
    ///
    /// The output always has one entry per input so that a rejected input
    /// can be isolated from its siblings.
    async fn embed(&self, texts: &[String]) -> Vec<Result<EmbeddingVector, EmbeddingError>>;

    async fn embed_one(&self, text: &str) -> Result<EmbeddingVector, EmbeddingError> {
        self.embed(&[text.to_string()])
            .await
            .pop()
            .unwrap_or_else(|| Err(EmbeddingError::Permanent("No embedding returned".to_string())))
    }
}
