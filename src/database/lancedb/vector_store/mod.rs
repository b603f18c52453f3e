
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType, Table,
    query::{ExecutableQuery, QueryBase},
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{record_schema, table_schema, verify_space};
use crate::config::Config;
use crate::database::{
    IndexEntry, IndexError, SearchResult, VectorIndex, check_dimension, sort_by_score,
    validate_namespace,
};
use crate::documents::{Chunk, ChunkMetadata};
use crate::embeddings::{EmbeddingSpace, EmbeddingVector};

/// Vector index backed by a LanceDB directory, one table per namespace
pub struct LanceVectorIndex {
    connection: Connection,
    space: EmbeddingSpace,
    path: PathBuf,
}

impl std::fmt::Debug for LanceVectorIndex {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanceVectorIndex")
            .field("path", &self.path)
            .field("space", &self.space)
            .finish_non_exhaustive()
    }
}

impl LanceVectorIndex {
    /// Open the index under the configured base directory
    #[inline]
    pub async fn new(config: &Config) -> Result<Self, IndexError> {
        Self::open(config.vector_database_path(), config.embedding_space()).await
    }

    /// Open (or create) an index directory for `space`.
    ///
    /// Every existing namespace table is checked against `space`, so an
    /// index built with another model or dimension fails here rather than
    /// at the first query.
    #[inline]
    pub async fn open(path: impl AsRef<Path>, space: EmbeddingSpace) -> Result<Self, IndexError> {
        let path = path.as_ref().to_path_buf();
        debug!("Initializing LanceDB at path: {:?}", path);

        std::fs::create_dir_all(&path).map_err(|e| {
            IndexError::Backend(format!("Failed to create vector database directory: {}", e))
        })?;

        let uri = format!("file://{}", path.display());
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| IndexError::Backend(format!("Failed to connect to LanceDB: {}", e)))?;

        let index = Self {
            connection,
            space,
            path,
        };
        index.verify_existing_tables().await?;

        info!(
            "Vector index opened at {:?} for {} ({} dimensions)",
            index.path, index.space.model, index.space.dimension
        );
        Ok(index)
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn verify_existing_tables(&self) -> Result<(), IndexError> {
        for namespace in self.table_names().await? {
            let table = self.open_existing(&namespace).await?;
            let schema = table
                .schema()
                .await
                .map_err(|e| IndexError::Backend(format!("Failed to get table schema: {}", e)))?;
            verify_space(&namespace, &schema, &self.space)?;
            debug!("Namespace {} matches the configured embedding space", namespace);
        }
        Ok(())
    }

    async fn table_names(&self) -> Result<Vec<String>, IndexError> {
        self.connection
            .table_names()
            .execute()
            .await
            .map_err(|e| IndexError::Backend(format!("Failed to list tables: {}", e)))
    }

    async fn open_existing(&self, namespace: &str) -> Result<Table, IndexError> {
        self.connection
            .open_table(namespace)
            .execute()
            .await
            .map_err(|e| IndexError::Backend(format!("Failed to open table {}: {}", namespace, e)))
    }

    async fn open_table(&self, namespace: &str) -> Result<Table, IndexError> {
        validate_namespace(namespace)?;
        if !self.table_names().await?.iter().any(|name| name == namespace) {
            return Err(IndexError::NamespaceNotFound(namespace.to_string()));
        }
        self.open_existing(namespace).await
    }

    async fn open_or_create_table(&self, namespace: &str) -> Result<Table, IndexError> {
        match self.open_table(namespace).await {
            Err(IndexError::NamespaceNotFound(_)) => {
                info!("Creating namespace table {}", namespace);
                match self
                    .connection
                    .create_empty_table(namespace, table_schema(&self.space))
                    .execute()
                    .await
                {
                    Ok(table) => Ok(table),
                    // Another writer may have created it in the meantime
                    Err(e) => {
                        warn!("Failed to create table {}: {}", namespace, e);
                        self.open_table(namespace).await
                    }
                }
            }
            other => other,
        }
    }

    /// Create a RecordBatch from index entries
    fn create_record_batch(&self, entries: &[IndexEntry]) -> Result<RecordBatch, IndexError> {
        let len = entries.len();
        let vector_dim = self.space.dimension;
        let created_at = chrono::Utc::now().to_rfc3339();

        let mut ids = Vec::with_capacity(len);
        let mut flat_values = Vec::with_capacity(len * vector_dim);
        let mut parent_ids = Vec::with_capacity(len);
        let mut sequences = Vec::with_capacity(len);
        let mut doc_ids = Vec::with_capacity(len);
        let mut urls = Vec::with_capacity(len);
        let mut titles = Vec::with_capacity(len);
        let mut contents = Vec::with_capacity(len);
        let mut token_counts = Vec::with_capacity(len);

        for entry in entries {
            ids.push(entry.key.as_str());
            flat_values.extend_from_slice(&entry.vector.values);
            parent_ids.push(entry.chunk.parent_id.as_str());
            sequences.push(entry.chunk.sequence);
            doc_ids.push(entry.chunk.metadata.id.as_str());
            urls.push(entry.chunk.metadata.url.as_deref());
            titles.push(entry.chunk.metadata.title.as_deref());
            contents.push(entry.chunk.text.as_str());
            token_counts.push(entry.chunk.token_count);
        }

        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array = FixedSizeListArray::try_new(
            field,
            vector_dim as i32,
            Arc::new(Float32Array::from(flat_values)),
            None,
        )
        .map_err(|e| IndexError::Backend(format!("Failed to create vector array: {}", e)))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(parent_ids)),
            Arc::new(UInt32Array::from(sequences)),
            Arc::new(StringArray::from(doc_ids)),
            Arc::new(StringArray::from(urls)),
            Arc::new(StringArray::from(titles)),
            Arc::new(StringArray::from(contents)),
            Arc::new(UInt32Array::from(token_counts)),
            Arc::new(StringArray::from(vec![created_at.as_str(); len])),
        ];

        RecordBatch::try_new(record_schema(vector_dim), arrays)
            .map_err(|e| IndexError::Backend(format!("Failed to create record batch: {}", e)))
    }

    /// Parse a single record batch from search results
    fn parse_search_batch(
        namespace: &str,
        batch: &RecordBatch,
    ) -> Result<Vec<SearchResult>, IndexError> {
        let parent_ids = string_column(batch, "parent_id")?;
        let sequences = u32_column(batch, "sequence")?;
        let doc_ids = string_column(batch, "doc_id")?;
        let urls = string_column(batch, "url")?;
        let titles = string_column(batch, "title")?;
        let contents = string_column(batch, "content")?;
        let token_counts = u32_column(batch, "token_count")?;

        let distances = batch
            .column_by_name("_distance")
            .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

        let optional = |column: &StringArray, row: usize| {
            (!column.is_null(row)).then(|| column.value(row).to_string())
        };

        let results = (0..batch.num_rows())
            .map(|row| {
                let distance = distances
                    .map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

                SearchResult {
                    chunk: Chunk {
                        parent_id: parent_ids.value(row).to_string(),
                        sequence: sequences.value(row),
                        text: contents.value(row).to_string(),
                        metadata: ChunkMetadata {
                            id: doc_ids.value(row).to_string(),
                            url: optional(urls, row),
                            title: optional(titles, row),
                        },
                        token_count: token_counts.value(row),
                    },
                    // Cosine distance to similarity, higher is better
                    score: 1.0 - distance,
                    namespace: namespace.to_string(),
                }
            })
            .collect();

        Ok(results)
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray, IndexError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| IndexError::Backend(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| IndexError::Backend(format!("Invalid {} column type", name)))
}

fn u32_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a UInt32Array, IndexError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| IndexError::Backend(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| IndexError::Backend(format!("Invalid {} column type", name)))
}

#[async_trait]
impl VectorIndex for LanceVectorIndex {
    fn space(&self) -> &EmbeddingSpace {
        &self.space
    }

    async fn upsert(&self, namespace: &str, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        validate_namespace(namespace)?;
        if entries.is_empty() {
            debug!("No entries to upsert into {}", namespace);
            return Ok(());
        }
        for entry in &entries {
            check_dimension(&self.space, &entry.vector)?;
        }

        debug!("Upserting {} entries into {}", entries.len(), namespace);

        let record_batch = self.create_record_batch(&entries)?;
        let table = self.open_or_create_table(namespace).await?;

        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);

        let mut merge = table.merge_insert(&["id"]);
        merge
            .when_matched_update_all(None)
            .when_not_matched_insert_all();
        merge
            .execute(Box::new(reader))
            .await
            .map_err(|e| IndexError::Backend(format!("Failed to upsert entries: {}", e)))?;

        info!("Upserted {} entries into {}", entries.len(), namespace);
        Ok(())
    }

    async fn search(
        &self,
        namespace: &str,
        query: &EmbeddingVector,
        k: usize,
    ) -> Result<Vec<SearchResult>, IndexError> {
        check_dimension(&self.space, query)?;
        let table = self.open_table(namespace).await?;

        if k == 0 {
            return Ok(Vec::new());
        }

        debug!("Searching {} for {} nearest entries", namespace, k);

        let mut stream = table
            .vector_search(query.values.as_slice())
            .map_err(|e| IndexError::Backend(format!("Failed to create vector search: {}", e)))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(k)
            .execute()
            .await
            .map_err(|e| IndexError::Backend(format!("Failed to execute search: {}", e)))?;

        let mut results = Vec::new();
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(|e| IndexError::Backend(format!("Failed to read result stream: {}", e)))?
        {
            results.extend(Self::parse_search_batch(namespace, &batch)?);
        }

        sort_by_score(&mut results);
        results.truncate(k);
        debug!("Found {} results in {}", results.len(), namespace);
        Ok(results)
    }

    async fn count(&self, namespace: &str) -> Result<usize, IndexError> {
        let table = self.open_table(namespace).await?;
        table
            .count_rows(None)
            .await
            .map_err(|e| IndexError::Backend(format!("Failed to count rows: {}", e)))
    }

    async fn namespaces(&self) -> Result<Vec<String>, IndexError> {
        let mut names = self.table_names().await?;
        names.sort();
        Ok(names)
    }

    async fn optimize(&self, namespace: &str) -> Result<(), IndexError> {
        debug!("Optimizing namespace {}", namespace);
        let table = self.open_table(namespace).await?;

        table
            .optimize(lancedb::table::OptimizeAction::All)
            .await
            .map_err(|e| IndexError::Backend(format!("Failed to optimize table: {}", e)))?;

        info!("Namespace {} optimized", namespace);
        Ok(())
    }
}
