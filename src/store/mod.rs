mod memory;
mod qdrant;

pub use memory::MemoryStore;
pub use qdrant::{QdrantStore, VectorDBConfig};

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::context::Context;
use crate::document::{keys, validate_dataset_id, Dataset, DatasetGetOpts, Document, Where, WhereDocument};
use crate::embeddings::{check_embedding_count, EmbeddingFunc};
use crate::error::StoreError;

/// Persistence and query facade over a vector database.
///
/// Datasets map one-to-one onto collections. Every operation takes a
/// [`Context`] and returns promptly once it is cancelled.
#[async_trait]
pub trait Store: Send + Sync {
    /// All datasets, sorted by id. Empty when none exist.
    async fn list_datasets(&self, ctx: &Context) -> Result<Vec<Dataset>, StoreError>;

    async fn get_dataset(
        &self,
        ctx: &Context,
        dataset_id: &str,
        opts: &DatasetGetOpts,
    ) -> Result<Dataset, StoreError>;

    /// Up to `num_documents` documents ranked by similarity to `query`, each
    /// carrying its score under the `similarity` metadata key.
    async fn similarity_search(
        &self,
        ctx: &Context,
        query: &str,
        num_documents: i64,
        collection: &str,
        where_filter: &Where,
        where_document: &[WhereDocument],
    ) -> Result<Vec<Document>, StoreError>;

    /// Every matching document, unranked.
    async fn get_documents(
        &self,
        ctx: &Context,
        dataset_id: &str,
        where_filter: &Where,
        where_document: &[WhereDocument],
    ) -> Result<Vec<Document>, StoreError>;

    /// Upsert documents by id, creating the dataset on first use. Documents
    /// without an embedding are embedded first. Returns the stored ids.
    async fn add_documents(
        &self,
        ctx: &Context,
        dataset_id: &str,
        documents: &[Document],
    ) -> Result<Vec<String>, StoreError>;

    /// Remove every document whose metadata matches `where_filter`. A dataset
    /// that does not exist has nothing to remove.
    async fn delete_documents(
        &self,
        ctx: &Context,
        dataset_id: &str,
        where_filter: &Where,
    ) -> Result<(), StoreError>;

    async fn delete_dataset(&self, ctx: &Context, dataset_id: &str) -> Result<(), StoreError>;
}

pub fn validate_num_documents(num_documents: i64) -> Result<usize, StoreError> {
    if num_documents <= 0 {
        return Err(StoreError::InvalidInput(format!(
            "num_documents must be positive, got {}",
            num_documents
        )));
    }
    usize::try_from(num_documents).map_err(|e| StoreError::InvalidInput(e.to_string()))
}

pub fn validate_dataset(dataset_id: &str) -> Result<(), StoreError> {
    validate_dataset_id(dataset_id).map_err(StoreError::InvalidInput)
}

pub fn validate_where_document(where_document: &[WhereDocument]) -> Result<(), StoreError> {
    where_document
        .iter()
        .try_for_each(WhereDocument::validate)
        .map_err(StoreError::InvalidInput)
}

pub(crate) async fn embed_query(
    ctx: &Context,
    embedder: &dyn EmbeddingFunc,
    query: &str,
) -> Result<Vec<f32>, StoreError> {
    let mut vectors = embedder.embed(ctx, &[query.to_string()]).await?;
    check_embedding_count(1, vectors.len())?;
    Ok(vectors.remove(0))
}

/// Copy `documents`, embedding the ones that arrive without a vector and
/// stamping each with the dataset id. All vectors must share one dimension.
pub(crate) async fn prepare_documents(
    ctx: &Context,
    embedder: &Arc<dyn EmbeddingFunc>,
    dataset_id: &str,
    documents: &[Document],
) -> Result<(Vec<Document>, Option<usize>), StoreError> {
    let mut prepared: Vec<Document> = documents.to_vec();

    let missing: Vec<usize> = prepared
        .iter()
        .enumerate()
        .filter(|(_, doc)| doc.embedding.is_none())
        .map(|(i, _)| i)
        .collect();
    if !missing.is_empty() {
        let texts: Vec<String> = missing.iter().map(|&i| prepared[i].content.clone()).collect();
        debug!(count = texts.len(), "Embedding documents before upsert");
        let vectors = embedder.embed(ctx, &texts).await?;
        check_embedding_count(texts.len(), vectors.len())?;
        for (i, vector) in missing.into_iter().zip(vectors) {
            prepared[i].set_embedding(vector);
        }
    }

    let mut dimension = None;
    for doc in &mut prepared {
        let len = doc.embedding().map(Vec::len).unwrap_or_default();
        match dimension {
            None => dimension = Some(len),
            Some(expected) if expected != len => {
                return Err(StoreError::InvalidInput(format!(
                    "document {} has a {}-dimensional embedding, expected {}",
                    doc.id, len, expected
                )));
            }
            Some(_) => {}
        }
        doc.metadata
            .insert(keys::DATASET_ID.to_string(), dataset_id.into());
    }
    if dimension == Some(0) {
        return Err(StoreError::InvalidInput("empty embedding".to_string()));
    }

    Ok((prepared, dimension))
}
