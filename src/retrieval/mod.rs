// Retrieval module
// Concurrent multi-namespace similarity search for a single question

pub mod context;


use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::RagError;
use crate::config::RetrievalConfig;
use crate::database::{IndexError, SearchResult, VectorIndex, sort_by_score};
use crate::embeddings::{Embedder, EmbeddingError};

pub use context::assemble;

pub const DEFAULT_RETRIEVAL_TIMEOUT: Duration = Duration::from_secs(30);

/// What to do when some namespaces fail and others succeed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Answer from the namespaces that succeeded
    #[default]
    Degrade,
    /// Any namespace failure fails the retrieval
    FailFast,
}

/// Ranked results of one namespace
#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceHits {
    pub namespace: String,
    pub results: Vec<SearchResult>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceFailure {
    pub namespace: String,
    pub reason: String,
}

/// Outcome of a retrieval, grouped by namespace in request order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Retrieval {
    pub hits: Vec<NamespaceHits>,
    pub failures: Vec<NamespaceFailure>,
}

impl Retrieval {
    /// True when some namespaces could not be searched
    #[inline]
    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }

    #[inline]
    pub fn result_count(&self) -> usize {
        self.hits.iter().map(|group| group.results.len()).sum()
    }

    /// All results, namespace by namespace
    #[inline]
    pub fn results(&self) -> impl Iterator<Item = &SearchResult> {
        self.hits.iter().flat_map(|group| group.results.iter())
    }
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("No namespaces to search")]
    NoNamespaces,
    #[error("Query is empty")]
    EmptyQuery,
    #[error("Failed to embed query: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("Retrieval timed out after {0:?}")]
    Timeout(Duration),
    #[error("All {} namespaces failed", .0.len())]
    AllNamespacesFailed(Vec<NamespaceFailure>),
    #[error("Search in namespace {namespace} failed: {source}")]
    NamespaceFailed {
        namespace: String,
        source: IndexError,
    },
}

impl From<RetrievalError> for RagError {
    #[inline]
    fn from(error: RetrievalError) -> Self {
        match error {
            RetrievalError::Embedding(e) => e.into(),
            RetrievalError::EmptyQuery => Self::Validation(error.to_string()),
            _ => Self::Retrieval(error.to_string()),
        }
    }
}

/// Embeds a question once and searches several namespaces concurrently
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    policy: FailurePolicy,
    timeout: Duration,
}

impl std::fmt::Debug for Retriever {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("space", self.embedder.space())
            .field("policy", &self.policy)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Retriever {
    #[inline]
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            embedder,
            index,
            policy: FailurePolicy::default(),
            timeout: DEFAULT_RETRIEVAL_TIMEOUT,
        }
    }

    #[inline]
    pub fn from_config(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        config: &RetrievalConfig,
    ) -> Self {
        Self::new(embedder, index)
            .with_policy(config.failure_policy)
            .with_timeout(config.timeout())
    }

    #[inline]
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[inline]
    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Retrieve up to `k` results from each namespace.
    ///
    /// Groups follow the order of `namespaces` (duplicates collapse onto
    /// their first occurrence), never the order in which searches finish.
    /// Dropping the returned future, or hitting the timeout, cancels every
    /// search still in flight.
    #[inline]
    pub async fn retrieve(
        &self,
        query: &str,
        namespaces: &[String],
        k: usize,
    ) -> Result<Retrieval, RetrievalError> {
        if query.trim().is_empty() {
            return Err(RetrievalError::EmptyQuery);
        }

        let mut seen = HashSet::new();
        let namespaces: Vec<&str> = namespaces
            .iter()
            .map(String::as_str)
            .filter(|namespace| seen.insert(*namespace))
            .collect();
        if namespaces.is_empty() {
            return Err(RetrievalError::NoNamespaces);
        }

        if let Ok(outcome) =
            tokio::time::timeout(self.timeout, self.search_all(query, &namespaces, k)).await
        {
            outcome
        } else {
            warn!(
                "Retrieval across {} namespaces timed out after {:?}",
                namespaces.len(),
                self.timeout
            );
            Err(RetrievalError::Timeout(self.timeout))
        }
    }

    async fn search_all(
        &self,
        query: &str,
        namespaces: &[&str],
        k: usize,
    ) -> Result<Retrieval, RetrievalError> {
        let vector = self.embedder.embed_one(query).await?;
        debug!(
            "Searching {} namespaces for top {} results each",
            namespaces.len(),
            k
        );

        let outcomes = join_all(
            namespaces
                .iter()
                .map(|namespace| self.index.search(namespace, &vector, k)),
        )
        .await;

        let mut retrieval = Retrieval::default();
        for (namespace, outcome) in namespaces.iter().zip(outcomes) {
            match outcome {
                Ok(mut results) => {
                    sort_by_score(&mut results);
                    results.truncate(k);
                    debug!("{} results from {}", results.len(), namespace);
                    retrieval.hits.push(NamespaceHits {
                        namespace: (*namespace).to_string(),
                        results,
                    });
                }
                Err(source) if self.policy == FailurePolicy::FailFast => {
                    return Err(RetrievalError::NamespaceFailed {
                        namespace: (*namespace).to_string(),
                        source,
                    });
                }
                Err(error) => {
                    warn!("Search in namespace {} failed: {}", namespace, error);
                    retrieval.failures.push(NamespaceFailure {
                        namespace: (*namespace).to_string(),
                        reason: error.to_string(),
                    });
                }
            }
        }

        if retrieval.hits.is_empty() {
            return Err(RetrievalError::AllNamespacesFailed(retrieval.failures));
        }

        if retrieval.is_degraded() {
            warn!(
                "Degraded retrieval: {} of {} namespaces failed",
                retrieval.failures.len(),
                namespaces.len()
            );
        } else {
            info!(
                "Retrieved {} results from {} namespaces",
                retrieval.result_count(),
                namespaces.len()
            );
        }

        Ok(retrieval)
    }
}
