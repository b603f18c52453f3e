use super::*;
use crate::documents::Document;

fn sample_chunk() -> Chunk {
    let document = Document {
        id: "doc-1".to_string(),
        text: "INSAT-3D imager data".to_string(),
        url: None,
        title: None,
    };
    document
        .chunk(&Default::default())
        .expect("should chunk")
        .remove(0)
}

#[test]
fn namespace_names() {
    assert!(is_valid_namespace("mosdac"));
    assert!(is_valid_namespace("mosdac-pdf"));
    assert!(is_valid_namespace("corpus_v2.1"));

    assert!(!is_valid_namespace(""));
    assert!(!is_valid_namespace("has space"));
    assert!(!is_valid_namespace("../escape"));
    assert!(!is_valid_namespace("quote'"));

    assert!(matches!(
        validate_namespace("a/b"),
        Err(IndexError::InvalidNamespace(_))
    ));
}

#[test]
fn entry_key_comes_from_chunk() {
    let entry = IndexEntry::new(sample_chunk(), EmbeddingVector::from(vec![1.0, 0.0]));
    assert_eq!(entry.key, "doc-1-chunk-0");
}

#[test]
fn dimension_check() {
    let space = EmbeddingSpace::new("test", 3);
    assert!(check_dimension(&space, &EmbeddingVector::from(vec![0.0; 3])).is_ok());
    assert_eq!(
        check_dimension(&space, &EmbeddingVector::from(vec![0.0; 4])),
        Err(IndexError::DimensionMismatch {
            expected: 3,
            actual: 4
        })
    );
}

#[test]
fn sorting_is_descending_and_stable() {
    let chunk = sample_chunk();
    let result = |score: f32, namespace: &str| SearchResult {
        chunk: chunk.clone(),
        score,
        namespace: namespace.to_string(),
    };
    let mut results = vec![
        result(0.40, "a"),
        result(0.91, "b"),
        result(0.40, "c"),
    ];

    sort_by_score(&mut results);

    let order: Vec<_> = results.iter().map(|r| r.namespace.as_str()).collect();
    assert_eq!(order, vec!["b", "a", "c"]);
}

#[test]
fn configuration_errors_map_to_config() {
    let error: RagError = IndexError::DimensionMismatch {
        expected: 768,
        actual: 384,
    }
    .into();
    assert!(matches!(error, RagError::Config(_)));

    let error: RagError = IndexError::NamespaceNotFound("x".to_string()).into();
    assert!(matches!(error, RagError::Database(_)));
}
