// Language model completion
// The answer generator behind the query pipeline, kept opaque to the core


use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::RagError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of a chat conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[inline]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[inline]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[inline]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompletionError {
    #[error("Transient completion failure: {0}")]
    Transient(String),
    #[error("Completion rejected: {0}")]
    Permanent(String),
    #[error("Model returned an empty answer")]
    EmptyResponse,
}

impl From<CompletionError> for RagError {
    #[inline]
    fn from(error: CompletionError) -> Self {
        Self::Completion(error.to_string())
    }
}

/// Turns a prompt into text
#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError>;
}
