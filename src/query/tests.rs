use super::*;
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::database::{IndexEntry, IndexError, MemoryVectorIndex, SearchResult, VectorIndex};
use crate::documents::{Chunk, ChunkMetadata};
use crate::embeddings::{Embedder, EmbeddingError, EmbeddingSpace, EmbeddingVector};

struct CountingEmbedder {
    space: EmbeddingSpace,
    calls: AtomicUsize,
}

#[async_trait]
impl Embedder for CountingEmbedder {
    fn space(&self) -> &EmbeddingSpace {
        &self.space
    }

    async fn embed(&self, texts: &[String]) -> Vec<Result<EmbeddingVector, EmbeddingError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        texts
            .iter()
            .map(|_| Ok(EmbeddingVector::from(vec![1.0, 0.0])))
            .collect()
    }
}

/// Delegates to a memory index but fails searches of chosen namespaces
struct PartiallyFailingIndex {
    inner: MemoryVectorIndex,
    failing: Vec<String>,
}

#[async_trait]
impl VectorIndex for PartiallyFailingIndex {
    fn space(&self) -> &EmbeddingSpace {
        self.inner.space()
    }

    async fn upsert(&self, namespace: &str, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        self.inner.upsert(namespace, entries).await
    }

    async fn search(
        &self,
        namespace: &str,
        query: &EmbeddingVector,
        k: usize,
    ) -> Result<Vec<SearchResult>, IndexError> {
        if self.failing.iter().any(|name| name == namespace) {
            return Err(IndexError::Backend("connection reset".to_string()));
        }
        self.inner.search(namespace, query, k).await
    }

    async fn count(&self, namespace: &str) -> Result<usize, IndexError> {
        self.inner.count(namespace).await
    }

    async fn namespaces(&self) -> Result<Vec<String>, IndexError> {
        self.inner.namespaces().await
    }
}

/// Records every prompt and answers with a fixed string
struct RecordingModel {
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
    response: Result<String, CompletionError>,
}

impl RecordingModel {
    fn answering(answer: &str) -> Self {
        Self {
            prompts: Mutex::new(Vec::new()),
            response: Ok(answer.to_string()),
        }
    }

    fn last_prompt(&self) -> Vec<ChatMessage> {
        self.prompts
            .lock()
            .expect("lock should not be poisoned")
            .last()
            .cloned()
            .expect("model should have been called")
    }
}

#[async_trait]
impl CompletionModel for RecordingModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        self.prompts
            .lock()
            .expect("lock should not be poisoned")
            .push(messages.to_vec());
        self.response.clone()
    }
}

fn entry(namespace: &str, text: &str, vector: Vec<f32>) -> IndexEntry {
    IndexEntry::new(
        Chunk {
            parent_id: format!("{}-{}", namespace, text.len()),
            sequence: 0,
            text: text.to_string(),
            metadata: ChunkMetadata {
                id: namespace.to_string(),
                url: None,
                title: None,
            },
            token_count: 1,
        },
        EmbeddingVector::from(vector),
    )
}

struct Fixture {
    embedder: Arc<CountingEmbedder>,
    model: Arc<RecordingModel>,
    pipeline: QueryPipeline,
}

async fn fixture(failing: &[&str], model: RecordingModel) -> Fixture {
    let space = EmbeddingSpace::new("test", 2);
    let inner = MemoryVectorIndex::new(space.clone());
    inner
        .upsert(
            "mosdac",
            vec![
                entry("mosdac", "Static page about INSAT-3D.", vec![1.0, 0.1]),
                entry("mosdac", "Unrelated static page.", vec![0.0, 1.0]),
            ],
        )
        .await
        .expect("should upsert");
    inner
        .upsert(
            "mosdac-pdf",
            vec![entry("mosdac-pdf", "PDF manual for INSAT-3D.", vec![1.0, 0.2])],
        )
        .await
        .expect("should upsert");

    let index = Arc::new(PartiallyFailingIndex {
        inner,
        failing: failing.iter().map(|name| (*name).to_string()).collect(),
    });
    let embedder = Arc::new(CountingEmbedder {
        space,
        calls: AtomicUsize::new(0),
    });
    let model = Arc::new(model);

    let retriever = Retriever::new(Arc::clone(&embedder) as Arc<dyn Embedder>, index);
    let pipeline = QueryPipeline::new(
        retriever,
        Arc::clone(&model) as Arc<dyn CompletionModel>,
        vec!["mosdac".to_string(), "mosdac-pdf".to_string()],
        1,
    );

    Fixture {
        embedder,
        model,
        pipeline,
    }
}

#[test]
fn prompt_layout() {
    let messages = build_prompt("system text", "ctx one\n\nctx two", "What is MOSDAC?");

    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0], ChatMessage::system("system text"));
    assert_eq!(
        messages[1],
        ChatMessage::user("Answer the following based on:\nctx one\n\nctx two\n\nQuestion: What is MOSDAC?")
    );
}

#[tokio::test]
async fn answers_from_all_namespaces_in_order() {
    let fixture = fixture(&[], RecordingModel::answering("INSAT-3D is a weather satellite.")).await;

    let answer = fixture
        .pipeline
        .answer("  What is INSAT-3D?  ")
        .await
        .expect("question should be answered");

    assert_eq!(
        answer,
        Answer {
            question: "What is INSAT-3D?".to_string(),
            answer: "INSAT-3D is a weather satellite.".to_string(),
            degraded: false,
        }
    );

    let prompt = fixture.model.last_prompt();
    assert_eq!(prompt[0], ChatMessage::system(DEFAULT_SYSTEM_PROMPT));
    assert_eq!(
        prompt[1].content,
        "Answer the following based on:\nStatic page about INSAT-3D.\n\nPDF manual for INSAT-3D.\n\nQuestion: What is INSAT-3D?"
    );
}

#[tokio::test]
async fn blank_question_never_reaches_retrieval() {
    let fixture = fixture(&[], RecordingModel::answering("unused")).await;

    let error = fixture
        .pipeline
        .answer(" \n\t ")
        .await
        .expect_err("blank question must be rejected");

    assert!(error.is_client_error());
    assert_eq!(fixture.embedder.calls.load(Ordering::SeqCst), 0);
    assert!(
        fixture
            .model
            .prompts
            .lock()
            .expect("lock should not be poisoned")
            .is_empty()
    );
}

#[tokio::test]
async fn failed_namespace_degrades_the_answer() {
    let fixture = fixture(&["mosdac-pdf"], RecordingModel::answering("From static pages.")).await;

    let answer = fixture
        .pipeline
        .answer("What is INSAT-3D?")
        .await
        .expect("partial context still answers");

    assert!(answer.degraded);
    let prompt = fixture.model.last_prompt();
    assert!(prompt[1].content.contains("Static page about INSAT-3D."));
    assert!(!prompt[1].content.contains("PDF manual"));
}

#[tokio::test]
async fn all_namespaces_failing_is_a_server_error() {
    let fixture = fixture(
        &["mosdac", "mosdac-pdf"],
        RecordingModel::answering("unused"),
    )
    .await;

    let error = fixture
        .pipeline
        .answer("What is INSAT-3D?")
        .await
        .expect_err("no context available");

    assert!(!error.is_client_error());
    assert!(matches!(
        error,
        QueryError::Retrieval(RetrievalError::AllNamespacesFailed(_))
    ));
}

#[tokio::test]
async fn completion_failure_is_a_server_error() {
    let model = RecordingModel {
        prompts: Mutex::new(Vec::new()),
        response: Err(CompletionError::Transient("HTTP 503".to_string())),
    };
    let fixture = fixture(&[], model).await;

    let error = fixture
        .pipeline
        .answer("What is INSAT-3D?")
        .await
        .expect_err("completion failed");

    assert!(!error.is_client_error());
    assert!(matches!(error, QueryError::Completion(_)));
}

#[tokio::test]
async fn retrieve_only() {
    let fixture = fixture(&[], RecordingModel::answering("unused")).await;

    let retrieval = fixture
        .pipeline
        .retrieve("INSAT-3D")
        .await
        .expect("retrieval should succeed");

    assert_eq!(retrieval.result_count(), 2);
    assert!(
        fixture
            .model
            .prompts
            .lock()
            .expect("lock should not be poisoned")
            .is_empty()
    );
}

#[test]
fn from_config_uses_configured_prompt_and_namespaces() {
    let mut config = Config::default();
    config.retrieval.namespaces = vec!["static".to_string()];
    config.completion.system_prompt = "Be terse.".to_string();

    let space = EmbeddingSpace::new("test", 2);
    let retriever = Retriever::new(
        Arc::new(CountingEmbedder {
            space: space.clone(),
            calls: AtomicUsize::new(0),
        }),
        Arc::new(MemoryVectorIndex::new(space)),
    );
    let pipeline = QueryPipeline::from_config(
        retriever,
        Arc::new(RecordingModel::answering("ok")),
        &config,
    );

    assert_eq!(pipeline.namespaces(), ["static".to_string()]);
    assert_eq!(pipeline.system_prompt, "Be terse.");
}
