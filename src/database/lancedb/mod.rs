// LanceDB vector database module
// One table per namespace; the embedding space is recorded in each table's schema

#[cfg(test)]
mod tests;

pub mod vector_store;

use arrow::datatypes::{DataType, Field, Schema};
use std::collections::HashMap;
use std::sync::Arc;

use super::IndexError;
use crate::embeddings::EmbeddingSpace;

pub use vector_store::LanceVectorIndex;

pub const EMBEDDING_MODEL_KEY: &str = "embedding_model";
pub const EMBEDDING_DIMENSION_KEY: &str = "embedding_dimension";

/// Column layout of a namespace table
#[inline]
pub fn record_fields(dimension: usize) -> Vec<Field> {
    vec![
        Field::new("id", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, false)),
                dimension as i32,
            ),
            false,
        ),
        Field::new("parent_id", DataType::Utf8, false),
        Field::new("sequence", DataType::UInt32, false),
        Field::new("doc_id", DataType::Utf8, false),
        Field::new("url", DataType::Utf8, true),
        Field::new("title", DataType::Utf8, true),
        Field::new("content", DataType::Utf8, false),
        Field::new("token_count", DataType::UInt32, false),
        Field::new("created_at", DataType::Utf8, false),
    ]
}

/// Schema of the record batches written to a table
#[inline]
pub fn record_schema(dimension: usize) -> Arc<Schema> {
    Arc::new(Schema::new(record_fields(dimension)))
}

/// Schema a new table is created with, carrying the embedding space as metadata
#[inline]
pub fn table_schema(space: &EmbeddingSpace) -> Arc<Schema> {
    let metadata = HashMap::from([
        (EMBEDDING_MODEL_KEY.to_string(), space.model.clone()),
        (
            EMBEDDING_DIMENSION_KEY.to_string(),
            space.dimension.to_string(),
        ),
    ]);
    Arc::new(Schema::new_with_metadata(
        record_fields(space.dimension),
        metadata,
    ))
}

/// Dimension of the `vector` column, if the schema has one
#[inline]
pub fn vector_dimension(schema: &Schema) -> Option<usize> {
    schema
        .field_with_name("vector")
        .ok()
        .and_then(|field| match field.data_type() {
            DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
            _ => None,
        })
}

/// Check that a table schema was built for `space`.
///
/// The dimension comes from the vector column itself; the model is only
/// known for tables that recorded it.
#[inline]
pub fn verify_space(
    namespace: &str,
    schema: &Schema,
    space: &EmbeddingSpace,
) -> Result<(), IndexError> {
    let dimension = vector_dimension(schema).ok_or_else(|| {
        IndexError::Backend(format!("Table {} has no vector column", namespace))
    })?;
    if dimension != space.dimension {
        return Err(IndexError::DimensionMismatch {
            expected: space.dimension,
            actual: dimension,
        });
    }

    match schema.metadata().get(EMBEDDING_MODEL_KEY) {
        Some(model) if model != &space.model => Err(IndexError::ModelMismatch {
            namespace: namespace.to_string(),
            expected: space.model.clone(),
            found: model.clone(),
        }),
        _ => Ok(()),
    }
}
