use super::*;

#[test]
fn table_schema_records_embedding_space() {
    let space = EmbeddingSpace::new("nomic-embed-text:latest", 768);
    let schema = table_schema(&space);

    assert_eq!(
        schema.metadata().get(EMBEDDING_MODEL_KEY).map(String::as_str),
        Some("nomic-embed-text:latest")
    );
    assert_eq!(
        schema.metadata().get(EMBEDDING_DIMENSION_KEY).map(String::as_str),
        Some("768")
    );
    assert_eq!(vector_dimension(&schema), Some(768));
    assert!(verify_space("mosdac", &schema, &space).is_ok());
}

#[test]
fn optional_metadata_columns_are_nullable() {
    let schema = record_schema(4);
    for name in ["url", "title"] {
        let field = schema.field_with_name(name).expect("column should exist");
        assert!(field.is_nullable(), "{} should be nullable", name);
    }
    let id = schema.field_with_name("id").expect("column should exist");
    assert!(!id.is_nullable());
}

#[test]
fn mismatched_space_is_rejected() {
    let schema = table_schema(&EmbeddingSpace::new("model-a", 8));

    assert_eq!(
        verify_space("mosdac", &schema, &EmbeddingSpace::new("model-a", 16)),
        Err(IndexError::DimensionMismatch {
            expected: 16,
            actual: 8
        })
    );
    assert!(matches!(
        verify_space("mosdac", &schema, &EmbeddingSpace::new("model-b", 8)),
        Err(IndexError::ModelMismatch { .. })
    ));
}

#[test]
fn tables_without_recorded_model_are_checked_by_dimension() {
    let schema = record_schema(8);
    assert!(verify_space("legacy", &schema, &EmbeddingSpace::new("any", 8)).is_ok());
    assert!(verify_space("legacy", &schema, &EmbeddingSpace::new("any", 9)).is_err());
}
