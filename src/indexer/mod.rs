// Indexer module
// Ingestion of NDJSON documents: chunk, embed and upsert one record at a time


use std::fmt;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

use crate::RagError;
use crate::database::{IndexEntry, IndexError, VectorIndex, validate_namespace};
use crate::documents::{Document, DocumentError};
use crate::embeddings::{ChunkingConfig, ChunkingError, Embedder, EmbeddingError};

/// Where a record was when it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionStage {
    ReadingLine,
    ParsingDocument,
    Chunking,
    Embedding,
    Upserting,
    Done,
}

impl fmt::Display for IngestionStage {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadingLine => "reading line",
            Self::ParsingDocument => "parsing document",
            Self::Chunking => "chunking",
            Self::Embedding => "embedding",
            Self::Upserting => "upserting",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    /// 1-based line number in the input
    pub line: usize,
    pub stage: IngestionStage,
    pub reason: String,
}

/// Summary of an ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestionStats {
    pub lines_read: usize,
    pub documents_ingested: usize,
    pub documents_failed: usize,
    pub chunks_indexed: usize,
    pub chunks_rejected: usize,
    pub failures: Vec<RecordFailure>,
}

/// Result of ingesting one document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DocumentOutcome {
    pub chunks_indexed: usize,
    pub chunks_rejected: usize,
}

#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("Failed to read input: {0}")]
    Io(#[from] std::io::Error),
    #[error("Line is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error("Invalid chunking configuration: {0}")]
    Chunking(#[from] ChunkingError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("All {chunks} chunks of document {document} were rejected by the embedding service")]
    AllChunksRejected { document: String, chunks: usize },
}

impl IngestionError {
    /// Errors that would fail every following record too, so the run stops
    #[inline]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Io(_) | Self::Chunking(_) => true,
            Self::Embedding(e) => e.is_configuration_error(),
            Self::Index(e) => {
                e.is_configuration_error() || matches!(e, IndexError::InvalidNamespace(_))
            }
            Self::Encoding(_) | Self::Document(_) | Self::AllChunksRejected { .. } => false,
        }
    }
}

impl From<IngestionError> for RagError {
    #[inline]
    fn from(error: IngestionError) -> Self {
        match error {
            IngestionError::Io(e) => Self::Io(e),
            IngestionError::Chunking(e) => Self::Config(e.to_string()),
            IngestionError::Embedding(e) => e.into(),
            IngestionError::Index(e) => e.into(),
            other => Self::Validation(other.to_string()),
        }
    }
}

/// A document-level failure and the stage it happened in
#[derive(Debug, Error)]
#[error("{stage} failed: {error}")]
pub struct StageFailure {
    pub stage: IngestionStage,
    #[source]
    pub error: IngestionError,
}

impl StageFailure {
    fn new(stage: IngestionStage, error: impl Into<IngestionError>) -> Self {
        Self {
            stage,
            error: error.into(),
        }
    }
}

/// Drives documents through chunking, embedding and the vector index
#[derive(Clone)]
pub struct IngestionPipeline {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    chunking: ChunkingConfig,
}

impl fmt::Debug for IngestionPipeline {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestionPipeline")
            .field("space", self.embedder.space())
            .field("chunking", &self.chunking)
            .finish_non_exhaustive()
    }
}

impl IngestionPipeline {
    /// Create a pipeline; invalid chunk sizes are rejected before any input is read
    #[inline]
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        chunking: ChunkingConfig,
    ) -> Result<Self, IngestionError> {
        chunking.validate()?;
        Ok(Self {
            embedder,
            index,
            chunking,
        })
    }

    /// Ingest an NDJSON file into `namespace`, then compact the namespace
    #[inline]
    pub async fn ingest_file(
        &self,
        path: &Path,
        namespace: &str,
    ) -> Result<IngestionStats, IngestionError> {
        self.ingest_file_with_progress(path, namespace, |_| {}).await
    }

    /// Like [`Self::ingest_file`], reporting the running totals after every line
    #[inline]
    pub async fn ingest_file_with_progress<F>(
        &self,
        path: &Path,
        namespace: &str,
        progress: F,
    ) -> Result<IngestionStats, IngestionError>
    where
        F: FnMut(&IngestionStats) + Send,
    {
        info!("Ingesting {} into namespace {}", path.display(), namespace);
        let file = tokio::fs::File::open(path).await?;

        let stats = self
            .ingest_reader_with_progress(BufReader::new(file), namespace, progress)
            .await?;

        if stats.chunks_indexed > 0 {
            if let Err(e) = self.index.optimize(namespace).await {
                warn!("Failed to optimize namespace {}: {}", namespace, e);
            }
        }

        Ok(stats)
    }

    #[inline]
    pub async fn ingest_reader<R>(
        &self,
        reader: R,
        namespace: &str,
    ) -> Result<IngestionStats, IngestionError>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        self.ingest_reader_with_progress(reader, namespace, |_| {})
            .await
    }

    /// Read records line by line, isolating failures to the record they occur in.
    ///
    /// Only errors that would repeat for every record (I/O, configuration)
    /// end the run early.
    #[inline]
    pub async fn ingest_reader_with_progress<R, F>(
        &self,
        mut reader: R,
        namespace: &str,
        mut progress: F,
    ) -> Result<IngestionStats, IngestionError>
    where
        R: AsyncBufRead + Unpin + Send,
        F: FnMut(&IngestionStats) + Send,
    {
        validate_namespace(namespace)?;

        let mut stats = IngestionStats::default();
        let mut buffer = Vec::new();

        loop {
            buffer.clear();
            if reader.read_until(b'\n', &mut buffer).await? == 0 {
                break;
            }
            stats.lines_read += 1;
            let line_number = stats.lines_read;

            let line = match String::from_utf8(std::mem::take(&mut buffer)) {
                Ok(line) => line,
                Err(e) => {
                    record_failure(&mut stats, line_number, IngestionStage::ReadingLine, &e.into());
                    progress(&stats);
                    continue;
                }
            };

            let line = line.trim_start_matches('\u{feff}').trim();
            if line.is_empty() {
                continue;
            }

            let document = match Document::parse_line(line) {
                Ok(document) => document,
                Err(e) => {
                    record_failure(
                        &mut stats,
                        line_number,
                        IngestionStage::ParsingDocument,
                        &e.into(),
                    );
                    progress(&stats);
                    continue;
                }
            };

            match self.ingest_document(&document, namespace).await {
                Ok(outcome) => {
                    stats.documents_ingested += 1;
                    stats.chunks_indexed += outcome.chunks_indexed;
                    stats.chunks_rejected += outcome.chunks_rejected;
                }
                Err(failure) if failure.error.is_fatal() => {
                    error!(
                        "Aborting ingestion at line {} ({}): {}",
                        line_number, failure.stage, failure.error
                    );
                    return Err(failure.error);
                }
                Err(failure) => {
                    if let IngestionError::AllChunksRejected { chunks, .. } = failure.error {
                        stats.chunks_rejected += chunks;
                    }
                    record_failure(&mut stats, line_number, failure.stage, &failure.error);
                }
            }
            progress(&stats);
        }

        info!(
            "Ingestion into {} finished: {} documents, {} chunks indexed, {} documents failed, {} chunks rejected",
            namespace,
            stats.documents_ingested,
            stats.chunks_indexed,
            stats.documents_failed,
            stats.chunks_rejected
        );
        Ok(stats)
    }

    /// Clean, chunk, embed and upsert a single document.
    ///
    /// Chunks the embedding service rejects are dropped; the rest are
    /// written in one upsert.
    #[inline]
    pub async fn ingest_document(
        &self,
        document: &Document,
        namespace: &str,
    ) -> Result<DocumentOutcome, StageFailure> {
        let cleaned;
        let document = if self.chunking.clean_markdown {
            cleaned = document
                .cleaned()
                .map_err(|e| StageFailure::new(IngestionStage::ParsingDocument, e))?;
            &cleaned
        } else {
            document
        };

        let chunks = document
            .chunk(&self.chunking)
            .map_err(|e| StageFailure::new(IngestionStage::Chunking, e))?;
        debug!("Document {} split into {} chunks", document.id, chunks.len());

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await;
        if vectors.len() != chunks.len() {
            return Err(StageFailure::new(
                IngestionStage::Embedding,
                EmbeddingError::Transient(format!(
                    "Expected {} embeddings, got {}",
                    chunks.len(),
                    vectors.len()
                )),
            ));
        }

        let mut outcome = DocumentOutcome::default();
        let mut entries = Vec::with_capacity(chunks.len());
        for (chunk, vector) in chunks.into_iter().zip(vectors) {
            match vector {
                Ok(vector) => entries.push(IndexEntry::new(chunk, vector)),
                Err(e) if e.is_permanent() => {
                    warn!("Dropping chunk {}: {}", chunk.key(), e);
                    outcome.chunks_rejected += 1;
                }
                Err(e) => return Err(StageFailure::new(IngestionStage::Embedding, e)),
            }
        }

        if entries.is_empty() {
            return Err(StageFailure::new(
                IngestionStage::Embedding,
                IngestionError::AllChunksRejected {
                    document: document.id.clone(),
                    chunks: outcome.chunks_rejected,
                },
            ));
        }

        outcome.chunks_indexed = entries.len();
        self.index
            .upsert(namespace, entries)
            .await
            .map_err(|e| StageFailure::new(IngestionStage::Upserting, e))?;

        debug!(
            "Document {} {}: {} chunks indexed",
            document.id,
            IngestionStage::Done,
            outcome.chunks_indexed
        );
        Ok(outcome)
    }
}

fn record_failure(
    stats: &mut IngestionStats,
    line: usize,
    stage: IngestionStage,
    error: &IngestionError,
) {
    warn!("Skipping line {} ({}): {}", line, stage, error);
    stats.documents_failed += 1;
    stats.failures.push(RecordFailure {
        line,
        stage,
        reason: error.to_string(),
    });
}
