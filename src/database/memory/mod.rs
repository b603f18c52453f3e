#[cfg(test)]
mod tests;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

use super::{
    IndexEntry, IndexError, SearchResult, VectorIndex, check_dimension, sort_by_score,
    validate_namespace,
};
use crate::embeddings::{EmbeddingSpace, EmbeddingVector};

type Namespace = HashMap<String, IndexEntry>;

/// Ephemeral index kept entirely in process memory
#[derive(Debug)]
pub struct MemoryVectorIndex {
    space: EmbeddingSpace,
    namespaces: RwLock<HashMap<String, Namespace>>,
}

impl MemoryVectorIndex {
    #[inline]
    pub fn new(space: EmbeddingSpace) -> Self {
        Self {
            space,
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    fn poisoned() -> IndexError {
        IndexError::Backend("Index lock poisoned".to_string())
    }
}

/// Cosine similarity; zero vectors are similar to nothing
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0_f32, 0.0_f32, 0.0_f32);
    for (x, y) in a.iter().zip(b) {
        dot = x.mul_add(*y, dot);
        norm_a = x.mul_add(*x, norm_a);
        norm_b = y.mul_add(*y, norm_b);
    }

    let denominator = norm_a.sqrt() * norm_b.sqrt();
    if denominator == 0.0 {
        0.0
    } else {
        dot / denominator
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    fn space(&self) -> &EmbeddingSpace {
        &self.space
    }

    async fn upsert(&self, namespace: &str, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        validate_namespace(namespace)?;
        for entry in &entries {
            check_dimension(&self.space, &entry.vector)?;
        }
        if entries.is_empty() {
            return Ok(());
        }

        let mut namespaces = self.namespaces.write().map_err(|_| Self::poisoned())?;
        let table = namespaces.entry(namespace.to_string()).or_default();
        debug!("Upserting {} entries into {}", entries.len(), namespace);
        for entry in entries {
            table.insert(entry.key.clone(), entry);
        }
        Ok(())
    }

    async fn search(
        &self,
        namespace: &str,
        query: &EmbeddingVector,
        k: usize,
    ) -> Result<Vec<SearchResult>, IndexError> {
        validate_namespace(namespace)?;
        check_dimension(&self.space, query)?;

        let namespaces = self.namespaces.read().map_err(|_| Self::poisoned())?;
        let table = namespaces
            .get(namespace)
            .ok_or_else(|| IndexError::NamespaceNotFound(namespace.to_string()))?;

        if k == 0 {
            return Ok(Vec::new());
        }

        // Key order keeps ties deterministic
        let mut entries: Vec<&IndexEntry> = table.values().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        let mut results: Vec<SearchResult> = entries
            .into_iter()
            .map(|entry| SearchResult {
                chunk: entry.chunk.clone(),
                score: cosine_similarity(&query.values, &entry.vector.values),
                namespace: namespace.to_string(),
            })
            .collect();
        sort_by_score(&mut results);
        results.truncate(k);
        Ok(results)
    }

    async fn count(&self, namespace: &str) -> Result<usize, IndexError> {
        let namespaces = self.namespaces.read().map_err(|_| Self::poisoned())?;
        namespaces
            .get(namespace)
            .map(HashMap::len)
            .ok_or_else(|| IndexError::NamespaceNotFound(namespace.to_string()))
    }

    async fn namespaces(&self) -> Result<Vec<String>, IndexError> {
        let namespaces = self.namespaces.read().map_err(|_| Self::poisoned())?;
        let mut names: Vec<String> = namespaces.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
