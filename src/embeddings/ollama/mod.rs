#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::completion::{ChatMessage, CompletionError, CompletionModel};
use crate::config::Config;
use crate::embeddings::{Embedder, EmbeddingError, EmbeddingSpace, EmbeddingVector};

pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 768;
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u32 = 2;
const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// Client for an Ollama server, used both for embeddings and chat completion
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    space: EmbeddingSpace,
    chat_model: String,
    temperature: f32,
    batch_size: u32,
    agent: ureq::Agent,
    retry_attempts: u32,
    backoff: Duration,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
    pub details: Option<ModelDetails>,
}

#[derive(Debug, Deserialize)]
pub struct ModelDetails {
    pub format: Option<String>,
    pub family: Option<String>,
    pub families: Option<Vec<String>>,
    pub parameter_size: Option<String>,
    pub quantization_level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

/// Outcome of an HTTP request once retries are exhausted
#[derive(Debug, Clone, PartialEq, Eq)]
enum RequestFailure {
    Transient(String),
    Permanent(String),
}

impl From<RequestFailure> for EmbeddingError {
    fn from(failure: RequestFailure) -> Self {
        match failure {
            RequestFailure::Transient(message) => Self::Transient(message),
            RequestFailure::Permanent(message) => Self::Permanent(message),
        }
    }
}

impl From<RequestFailure> for CompletionError {
    fn from(failure: RequestFailure) -> Self {
        match failure {
            RequestFailure::Transient(message) => Self::Transient(message),
            RequestFailure::Permanent(message) => Self::Permanent(message),
        }
    }
}

/// Whether a transport error is worth another attempt
fn classify(error: &ureq::Error) -> RequestFailure {
    match error {
        ureq::Error::StatusCode(429) => RequestFailure::Transient("Rate limited: HTTP 429".to_string()),
        ureq::Error::StatusCode(status) if *status >= 500 => {
            RequestFailure::Transient(format!("Server error: HTTP {}", status))
        }
        ureq::Error::StatusCode(status) => {
            RequestFailure::Permanent(format!("Client error: HTTP {}", status))
        }
        ureq::Error::ConnectionFailed
        | ureq::Error::HostNotFound
        | ureq::Error::Timeout(_)
        | ureq::Error::Io(_) => RequestFailure::Transient(format!("Transport error: {}", error)),
        _ => RequestFailure::Permanent(format!("Non-retryable error: {}", error)),
    }
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = config
            .ollama
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.ollama.timeout_seconds)))
            .build()
            .into();

        Ok(Self {
            base_url,
            space: config.embedding_space(),
            chat_model: config.completion.model.clone(),
            temperature: config.completion.temperature,
            batch_size: config.ollama.batch_size,
            agent,
            retry_attempts: config.ollama.retry_attempts,
            backoff: DEFAULT_BACKOFF,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Base delay of the exponential backoff between retries
    #[inline]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Test connection to Ollama server and verify model availability
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        self.ping().context("Server ping failed")?;
        self.validate_models().context("Model validation failed")?;

        info!(
            "Health check passed for Ollama server at {} with models {} and {}",
            self.base_url, self.space.model, self.chat_model
        );
        Ok(())
    }

    /// Ping the Ollama server to check if it's responsive
    #[inline]
    pub fn ping(&self) -> Result<()> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build ping URL")?;

        debug!("Pinging Ollama server at {}", url);

        self.make_request_with_retry(&CancellationToken::new(), || {
            self.agent
                .get(url.as_str())
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .map_err(|failure| anyhow::anyhow!("{:?}", failure))
        .context("Failed to ping Ollama server")?;

        debug!("Server ping successful");
        Ok(())
    }

    /// Validate that both the embedding and the chat model are installed
    #[inline]
    pub fn validate_models(&self) -> Result<()> {
        let models = self.list_models().context("Failed to list models")?;
        let available = models.iter().map(|m| m.name.as_str()).collect::<Vec<_>>();

        for wanted in [self.space.model.as_str(), self.chat_model.as_str()] {
            if !available.contains(&wanted) {
                warn!(
                    "Model {} not found. Available models: {:?}",
                    wanted, available
                );
                return Err(anyhow::anyhow!(
                    "Model '{}' is not available. Available models: {:?}",
                    wanted,
                    available
                ));
            }
        }

        Ok(())
    }

    /// List all available models
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build models URL")?;

        debug!("Fetching available models from {}", url);

        let response_text = self
            .make_request_with_retry(&CancellationToken::new(), || {
                self.agent
                    .get(url.as_str())
                    .call()
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .map_err(|failure| anyhow::anyhow!("{:?}", failure))
            .context("Failed to fetch models")?;

        let models_response: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    /// Embed texts in batches of the configured size, isolating rejected inputs
    #[inline]
    pub fn embed_blocking(&self, texts: &[String]) -> Vec<Result<EmbeddingVector, EmbeddingError>> {
        self.embed_blocking_until(texts, &CancellationToken::new())
    }

    /// Like [`Self::embed_blocking`], giving up before the next request once
    /// `cancel` fires.
    ///
    /// Inputs that were never sent carry a transient error so the output still
    /// has one entry per input.
    #[inline]
    pub fn embed_blocking_until(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> Vec<Result<EmbeddingVector, EmbeddingError>> {
        debug!("Generating embeddings for {} texts", texts.len());

        let mut results: Vec<Result<EmbeddingVector, EmbeddingError>> =
            Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size.max(1) as usize) {
            if cancel.is_cancelled() {
                results.extend(batch.iter().map(|_| Err(EmbeddingError::from(cancelled()))));
                continue;
            }

            match self.request_embeddings(batch, cancel) {
                Ok(vectors) => results.extend(vectors.into_iter().map(Ok)),
                Err(EmbeddingError::Permanent(reason)) if batch.len() > 1 => {
                    warn!(
                        "Batch of {} texts rejected ({}), retrying inputs individually",
                        batch.len(),
                        reason
                    );
                    results.extend(batch.iter().map(|text| {
                        self.request_embeddings(std::slice::from_ref(text), cancel)
                            .and_then(|mut vectors| {
                                vectors.pop().ok_or_else(|| {
                                    EmbeddingError::Permanent("Empty embedding response".to_string())
                                })
                            })
                    }));
                }
                Err(e) => {
                    error!("Failed to embed batch of {} texts: {}", batch.len(), e);
                    results.extend(batch.iter().map(|_| Err(e.clone())));
                }
            }
        }

        debug!("Generated {} embedding results total", results.len());
        results
    }

    fn request_embeddings(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<EmbeddingVector>, EmbeddingError> {
        let request = EmbedRequest {
            model: &self.space.model,
            input: texts,
        };

        let url = self
            .base_url
            .join("/api/embed")
            .map_err(|e| EmbeddingError::Permanent(format!("Failed to build embedding URL: {}", e)))?;

        let request_json = serde_json::to_string(&request).map_err(|e| {
            EmbeddingError::Permanent(format!("Failed to serialize embedding request: {}", e))
        })?;

        let response_text = self.make_request_with_retry(cancel, || {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;

        let response: EmbedResponse = serde_json::from_str(&response_text).map_err(|e| {
            EmbeddingError::Permanent(format!("Failed to parse embedding response: {}", e))
        })?;

        if response.embeddings.len() != texts.len() {
            return Err(EmbeddingError::Permanent(format!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.embeddings.len()
            )));
        }

        response
            .embeddings
            .into_iter()
            .map(|values| {
                if values.len() == self.space.dimension {
                    Ok(EmbeddingVector::from(values))
                } else {
                    Err(EmbeddingError::DimensionMismatch {
                        expected: self.space.dimension,
                        actual: values.len(),
                    })
                }
            })
            .collect()
    }

    /// Run a non-streaming chat completion
    #[inline]
    pub fn chat_blocking(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        self.chat_blocking_until(messages, &CancellationToken::new())
    }

    /// Like [`Self::chat_blocking`], without further attempts once `cancel` fires
    #[inline]
    pub fn chat_blocking_until(
        &self,
        messages: &[ChatMessage],
        cancel: &CancellationToken,
    ) -> Result<String, CompletionError> {
        let request = ChatRequest {
            model: &self.chat_model,
            messages,
            stream: false,
            options: ChatOptions {
                temperature: self.temperature,
            },
        };

        let url = self
            .base_url
            .join("/api/chat")
            .map_err(|e| CompletionError::Permanent(format!("Failed to build chat URL: {}", e)))?;

        let request_json = serde_json::to_string(&request).map_err(|e| {
            CompletionError::Permanent(format!("Failed to serialize chat request: {}", e))
        })?;

        debug!(
            "Requesting completion from {} with {} messages",
            self.chat_model,
            messages.len()
        );

        let response_text = self.make_request_with_retry(cancel, || {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;

        let response: ChatResponse = serde_json::from_str(&response_text).map_err(|e| {
            CompletionError::Permanent(format!("Failed to parse chat response: {}", e))
        })?;

        let answer = response.message.content.trim().to_string();
        if answer.is_empty() {
            return Err(CompletionError::EmptyResponse);
        }

        Ok(answer)
    }

    fn make_request_with_retry<F>(
        &self,
        cancel: &CancellationToken,
        mut request_fn: F,
    ) -> Result<String, RequestFailure>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut last_failure = None;

        for attempt in 1..=self.retry_attempts {
            if cancel.is_cancelled() {
                debug!("Request to {} cancelled before attempt {}", self.base_url, attempt);
                return Err(cancelled());
            }
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response_text) => {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(response_text);
                }
                Err(error) => {
                    let failure = classify(&error);
                    if let RequestFailure::Permanent(ref message) = failure {
                        warn!("{}, not retrying", message);
                        return Err(failure);
                    }

                    warn!(
                        "{:?}, attempt {}/{}",
                        failure, attempt, self.retry_attempts
                    );
                    last_failure = Some(failure);

                    if attempt < self.retry_attempts {
                        let delay = self.backoff * EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1);
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        error!("All retry attempts failed for request to {}", self.base_url);

        Err(last_failure.unwrap_or_else(|| {
            RequestFailure::Transient("Request failed after retries".to_string())
        }))
    }
}

fn cancelled() -> RequestFailure {
    RequestFailure::Transient("Request cancelled".to_string())
}

#[async_trait]
impl Embedder for OllamaClient {
    fn space(&self) -> &EmbeddingSpace {
        &self.space
    }

    async fn embed(&self, texts: &[String]) -> Vec<Result<EmbeddingVector, EmbeddingError>> {
        if texts.is_empty() {
            return Vec::new();
        }

        let client = self.clone();
        let inputs = texts.to_vec();
        // Dropping this future (e.g. on a query timeout) stops the retries
        let cancel = CancellationToken::new();
        let _guard = cancel.clone().drop_guard();
        match tokio::task::spawn_blocking(move || client.embed_blocking_until(&inputs, &cancel))
            .await
        {
            Ok(results) => results,
            Err(e) => {
                error!("Embedding task failed: {}", e);
                texts
                    .iter()
                    .map(|_| Err(EmbeddingError::Transient(format!("Embedding task failed: {}", e))))
                    .collect()
            }
        }
    }
}

#[async_trait]
impl CompletionModel for OllamaClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        let client = self.clone();
        let messages = messages.to_vec();
        let cancel = CancellationToken::new();
        let _guard = cancel.clone().drop_guard();
        tokio::task::spawn_blocking(move || client.chat_blocking_until(&messages, &cancel))
            .await
            .map_err(|e| CompletionError::Transient(format!("Completion task failed: {}", e)))?
    }
}
