// Query module
// Question answering: retrieve, assemble context, prompt the completion model

#[cfg(test)]
mod tests;

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::RagError;
use crate::completion::{ChatMessage, CompletionError, CompletionModel};
use crate::config::{Config, DEFAULT_SYSTEM_PROMPT};
use crate::retrieval::{Retrieval, RetrievalError, Retriever, assemble};

/// An answered question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub question: String,
    pub answer: String,
    /// Some namespaces could not be searched
    pub degraded: bool,
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Invalid question: {0}")]
    Validation(String),
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
    #[error(transparent)]
    Completion(#[from] CompletionError),
}

impl QueryError {
    /// Whether the caller, not the system, is at fault
    #[inline]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl From<QueryError> for RagError {
    #[inline]
    fn from(error: QueryError) -> Self {
        match error {
            QueryError::Validation(message) => Self::Validation(message),
            QueryError::Retrieval(e) => e.into(),
            QueryError::Completion(e) => e.into(),
        }
    }
}

/// Build the two-message prompt sent to the completion model
#[inline]
pub fn build_prompt(system_prompt: &str, context: &str, question: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user(format!(
            "Answer the following based on:\n{}\n\nQuestion: {}",
            context, question
        )),
    ]
}

#[derive(Clone)]
pub struct QueryPipeline {
    retriever: Retriever,
    completion: Arc<dyn CompletionModel>,
    namespaces: Vec<String>,
    top_k: usize,
    system_prompt: String,
}

impl std::fmt::Debug for QueryPipeline {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryPipeline")
            .field("retriever", &self.retriever)
            .field("namespaces", &self.namespaces)
            .field("top_k", &self.top_k)
            .finish_non_exhaustive()
    }
}

impl QueryPipeline {
    #[inline]
    pub fn new(
        retriever: Retriever,
        completion: Arc<dyn CompletionModel>,
        namespaces: Vec<String>,
        top_k: usize,
    ) -> Self {
        Self {
            retriever,
            completion,
            namespaces,
            top_k,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    /// Namespaces, result count and system prompt taken from `config`
    #[inline]
    pub fn from_config(
        retriever: Retriever,
        completion: Arc<dyn CompletionModel>,
        config: &Config,
    ) -> Self {
        Self::new(
            retriever,
            completion,
            config.retrieval.namespaces.clone(),
            config.retrieval.top_k,
        )
        .with_system_prompt(config.completion.system_prompt.clone())
    }

    #[inline]
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    #[inline]
    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    /// Retrieve context for a question without calling the model
    #[inline]
    pub async fn retrieve(&self, question: &str) -> Result<Retrieval, QueryError> {
        let question = validate_question(question)?;
        Ok(self
            .retriever
            .retrieve(question, &self.namespaces, self.top_k)
            .await?)
    }

    /// Answer a question from retrieved context
    #[inline]
    pub async fn answer(&self, question: &str) -> Result<Answer, QueryError> {
        let question = validate_question(question)?;
        debug!("Answering question: {}", question);

        let retrieval = self
            .retriever
            .retrieve(question, &self.namespaces, self.top_k)
            .await?;
        if retrieval.is_degraded() {
            let failed: Vec<&str> = retrieval
                .failures
                .iter()
                .map(|failure| failure.namespace.as_str())
                .collect();
            warn!("Answering from partial context; failed namespaces: {:?}", failed);
        }

        let context = assemble(&retrieval.hits, &self.namespaces);
        let messages = build_prompt(&self.system_prompt, &context, question);
        let answer = self.completion.complete(&messages).await?;

        info!(
            "Answered question using {} retrieved chunks",
            retrieval.result_count()
        );
        Ok(Answer {
            question: question.to_string(),
            answer,
            degraded: retrieval.is_degraded(),
        })
    }
}

fn validate_question(question: &str) -> Result<&str, QueryError> {
    let trimmed = question.trim();
    if trimmed.is_empty() {
        return Err(QueryError::Validation(
            "Question must not be empty".to_string(),
        ));
    }
    Ok(trimmed)
}
