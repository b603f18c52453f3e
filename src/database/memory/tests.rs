use super::*;
use crate::documents::{Chunk, ChunkMetadata};

fn space() -> EmbeddingSpace {
    EmbeddingSpace::new("test-model", 3)
}

fn entry(parent: &str, sequence: u32, text: &str, vector: Vec<f32>) -> IndexEntry {
    IndexEntry::new(
        Chunk {
            parent_id: parent.to_string(),
            sequence,
            text: text.to_string(),
            metadata: ChunkMetadata {
                id: parent.to_string(),
                url: Some(format!("https://www.mosdac.gov.in/{}", parent)),
                title: None,
            },
            token_count: 3,
        },
        EmbeddingVector::from(vector),
    )
}

#[test]
fn cosine_similarity_values() {
    assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).abs() < f32::EPSILON);
}

#[tokio::test]
async fn upsert_then_search_ranks_by_similarity() {
    let index = MemoryVectorIndex::new(space());
    index
        .upsert(
            "mosdac",
            vec![
                entry("far", 0, "far away", vec![0.0, 1.0, 0.0]),
                entry("near", 0, "close by", vec![1.0, 0.1, 0.0]),
                entry("mid", 0, "in between", vec![1.0, 1.0, 0.0]),
            ],
        )
        .await
        .expect("should upsert");

    let results = index
        .search("mosdac", &EmbeddingVector::from(vec![1.0, 0.0, 0.0]), 2)
        .await
        .expect("should search");

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].chunk.parent_id, "near");
    assert_eq!(results[1].chunk.parent_id, "mid");
    assert!(results[0].score > results[1].score);
    assert!(results.iter().all(|r| r.namespace == "mosdac"));
}

#[tokio::test]
async fn upsert_is_idempotent_by_key() {
    let index = MemoryVectorIndex::new(space());
    index
        .upsert("mosdac", vec![entry("doc", 0, "old", vec![1.0, 0.0, 0.0])])
        .await
        .expect("should upsert");
    index
        .upsert("mosdac", vec![entry("doc", 0, "new", vec![0.0, 1.0, 0.0])])
        .await
        .expect("should upsert again");

    assert_eq!(index.count("mosdac").await.expect("should count"), 1);

    let results = index
        .search("mosdac", &EmbeddingVector::from(vec![0.0, 1.0, 0.0]), 5)
        .await
        .expect("should search");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk.text, "new");
    assert!((results[0].score - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn namespaces_are_isolated() {
    let index = MemoryVectorIndex::new(space());
    index
        .upsert("mosdac", vec![entry("a", 0, "static", vec![1.0, 0.0, 0.0])])
        .await
        .expect("should upsert");
    index
        .upsert("mosdac-pdf", vec![entry("b", 0, "pdf", vec![1.0, 0.0, 0.0])])
        .await
        .expect("should upsert");

    let results = index
        .search("mosdac-pdf", &EmbeddingVector::from(vec![1.0, 0.0, 0.0]), 10)
        .await
        .expect("should search");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk.text, "pdf");

    assert_eq!(
        index.namespaces().await.expect("should list"),
        vec!["mosdac", "mosdac-pdf"]
    );
}

#[tokio::test]
async fn missing_namespace_and_zero_k() {
    let index = MemoryVectorIndex::new(space());
    let query = EmbeddingVector::from(vec![1.0, 0.0, 0.0]);

    assert_eq!(
        index.search("nowhere", &query, 3).await,
        Err(IndexError::NamespaceNotFound("nowhere".to_string()))
    );
    assert!(index.count("nowhere").await.is_err());

    index
        .upsert("mosdac", vec![entry("a", 0, "text", vec![1.0, 0.0, 0.0])])
        .await
        .expect("should upsert");
    assert!(
        index
            .search("mosdac", &query, 0)
            .await
            .expect("should search")
            .is_empty()
    );
}

#[tokio::test]
async fn wrong_dimension_is_rejected() {
    let index = MemoryVectorIndex::new(space());

    let error = index
        .upsert("mosdac", vec![entry("a", 0, "text", vec![1.0, 0.0])])
        .await
        .expect_err("short vector must be rejected");
    assert!(error.is_configuration_error());
    assert!(index.namespaces().await.expect("should list").is_empty());

    assert!(matches!(
        index
            .search("mosdac", &EmbeddingVector::from(vec![1.0; 4]), 1)
            .await,
        Err(IndexError::DimensionMismatch { .. })
    ));
}

#[tokio::test]
async fn invalid_namespace_is_rejected() {
    let index = MemoryVectorIndex::new(space());
    assert!(matches!(
        index
            .upsert("bad name", vec![entry("a", 0, "t", vec![1.0, 0.0, 0.0])])
            .await,
        Err(IndexError::InvalidNamespace(_))
    ));
}

#[tokio::test]
async fn empty_upsert_does_not_create_namespace() {
    let index = MemoryVectorIndex::new(space());

    index
        .upsert("ghost", Vec::new())
        .await
        .expect("empty upsert is a no-op");

    assert!(index.namespaces().await.expect("should list").is_empty());
    assert!(matches!(
        index
            .search("ghost", &EmbeddingVector::from(vec![1.0, 0.0, 0.0]), 1)
            .await,
        Err(IndexError::NamespaceNotFound(_))
    ));
}
