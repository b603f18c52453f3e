// Database module
// Namespaced vector storage: the index contract and its LanceDB and in-memory backends

pub mod lancedb;
pub mod memory;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use thiserror::Error;

use crate::RagError;
use crate::documents::Chunk;
use crate::embeddings::{EmbeddingSpace, EmbeddingVector};

pub use self::lancedb::LanceVectorIndex;
pub use memory::MemoryVectorIndex;

/// A chunk and its vector, addressed by its chunk key
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub key: String,
    pub vector: EmbeddingVector,
    pub chunk: Chunk,
}

impl IndexEntry {
    #[inline]
    pub fn new(chunk: Chunk, vector: EmbeddingVector) -> Self {
        Self {
            key: chunk.key(),
            vector,
            chunk,
        }
    }
}

/// One hit of a similarity search. Higher scores are more similar.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub chunk: Chunk,
    pub score: f32,
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    #[error("Invalid namespace name: {0:?}")]
    InvalidNamespace(String),
    #[error("Namespace not found: {0}")]
    NamespaceNotFound(String),
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error(
        "Namespace {namespace} was built with embedding model {found}, but {expected} is configured"
    )]
    ModelMismatch {
        namespace: String,
        expected: String,
        found: String,
    },
    #[error("Vector backend error: {0}")]
    Backend(String),
}

impl IndexError {
    /// Errors that no retry or later record can fix
    #[inline]
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::DimensionMismatch { .. } | Self::ModelMismatch { .. }
        )
    }
}

impl From<IndexError> for RagError {
    #[inline]
    fn from(error: IndexError) -> Self {
        if error.is_configuration_error() {
            Self::Config(error.to_string())
        } else {
            Self::Database(error.to_string())
        }
    }
}

/// Namespaced store of chunk vectors
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// The embedding space every stored vector belongs to
    fn space(&self) -> &EmbeddingSpace;

    /// Insert or replace entries by key, creating the namespace if needed.
    ///
    /// All entries of one call are committed together.
    async fn upsert(&self, namespace: &str, entries: Vec<IndexEntry>) -> Result<(), IndexError>;

    /// Up to `k` nearest entries, sorted by descending score
    async fn search(
        &self,
        namespace: &str,
        query: &EmbeddingVector,
        k: usize,
    ) -> Result<Vec<SearchResult>, IndexError>;

    async fn count(&self, namespace: &str) -> Result<usize, IndexError>;

    async fn namespaces(&self) -> Result<Vec<String>, IndexError>;

    /// Compact a namespace after bulk writes; a no-op where nothing needs compacting
    async fn optimize(&self, _namespace: &str) -> Result<(), IndexError> {
        Ok(())
    }
}

/// Namespaces are used as table names, so they are restricted to a safe alphabet
#[inline]
pub fn is_valid_namespace(namespace: &str) -> bool {
    !namespace.is_empty()
        && namespace
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[inline]
pub fn validate_namespace(namespace: &str) -> Result<(), IndexError> {
    if is_valid_namespace(namespace) {
        Ok(())
    } else {
        Err(IndexError::InvalidNamespace(namespace.to_string()))
    }
}

/// Reject vectors that do not belong to `space`
#[inline]
pub fn check_dimension(space: &EmbeddingSpace, vector: &EmbeddingVector) -> Result<(), IndexError> {
    if vector.dimension() == space.dimension {
        Ok(())
    } else {
        Err(IndexError::DimensionMismatch {
            expected: space.dimension,
            actual: vector.dimension(),
        })
    }
}

/// Sort by descending score; ties keep their original order
pub(crate) fn sort_by_score(results: &mut [SearchResult]) {
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
}
