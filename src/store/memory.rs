//! In-memory store for tests and local experiments.
//!
//! Similarity is brute-force cosine over every document in the collection.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::context::Context;
use crate::document::{keys, Dataset, DatasetGetOpts, Document, Where, WhereDocument};
use crate::embeddings::EmbeddingFunc;
use crate::error::StoreError;
use crate::store::{
    embed_query, prepare_documents, validate_dataset, validate_num_documents,
    validate_where_document, Store,
};

#[derive(Default)]
struct Collection {
    embed_dimension: Option<usize>,
    /// Insertion order; upserts replace in place.
    documents: Vec<Document>,
}

impl Collection {
    fn upsert(&mut self, doc: Document) {
        match self.documents.iter_mut().find(|d| d.id == doc.id) {
            Some(existing) => *existing = doc,
            None => self.documents.push(doc),
        }
    }

    fn to_dataset(&self, id: &str) -> Dataset {
        Dataset {
            embed_dimension: self.embed_dimension,
            document_count: self.documents.len(),
            ..Dataset::new(id)
        }
    }
}

pub struct MemoryStore {
    embedder: Arc<dyn EmbeddingFunc>,
    collections: Arc<RwLock<BTreeMap<String, Collection>>>,
}

impl MemoryStore {
    pub fn new(embedder: Arc<dyn EmbeddingFunc>) -> Self {
        Self {
            embedder,
            collections: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Compute cosine similarity between two vectors.
    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return 0.0;
        }

        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }

        let score = dot / (norm_a * norm_b);
        if score.is_nan() {
            0.0
        } else {
            score
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_datasets(&self, ctx: &Context) -> Result<Vec<Dataset>, StoreError> {
        ctx.check()?;
        let collections = self.collections.read().await;
        Ok(collections
            .iter()
            .map(|(id, collection)| collection.to_dataset(id))
            .collect())
    }

    async fn get_dataset(
        &self,
        ctx: &Context,
        dataset_id: &str,
        opts: &DatasetGetOpts,
    ) -> Result<Dataset, StoreError> {
        ctx.check()?;
        let collections = self.collections.read().await;
        let collection = collections
            .get(dataset_id)
            .ok_or_else(|| StoreError::DatasetNotFound(dataset_id.to_string()))?;

        let mut dataset = collection.to_dataset(dataset_id);
        if opts.include_documents {
            dataset.documents = opts.page(collection.documents.clone());
        }
        Ok(dataset)
    }

    async fn similarity_search(
        &self,
        ctx: &Context,
        query: &str,
        num_documents: i64,
        collection: &str,
        where_filter: &Where,
        where_document: &[WhereDocument],
    ) -> Result<Vec<Document>, StoreError> {
        let limit = validate_num_documents(num_documents)?;
        validate_where_document(where_document)?;
        ctx.check()?;

        if !self.collections.read().await.contains_key(collection) {
            return Err(StoreError::DatasetNotFound(collection.to_string()));
        }

        let query_vector = embed_query(ctx, self.embedder.as_ref(), query).await?;

        let collections = self.collections.read().await;
        let documents = collections
            .get(collection)
            .map(|c| c.documents.as_slice())
            .unwrap_or_default();

        let mut scored: Vec<(f32, &Document)> = documents
            .iter()
            .filter(|doc| doc.matches(where_filter, where_document))
            .filter_map(|doc| {
                doc.embedding()
                    .map(|embedding| (Self::cosine_similarity(&query_vector, embedding), doc))
            })
            .collect();

        // Sort by score descending
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        let results: Vec<Document> = scored
            .into_iter()
            .take(limit)
            .map(|(score, doc)| {
                let mut doc = doc.clone();
                doc.metadata
                    .insert(keys::SIMILARITY.to_string(), f64::from(score).into());
                doc
            })
            .collect();
        debug!(collection, results = results.len(), "Similarity search");
        Ok(results)
    }

    async fn get_documents(
        &self,
        ctx: &Context,
        dataset_id: &str,
        where_filter: &Where,
        where_document: &[WhereDocument],
    ) -> Result<Vec<Document>, StoreError> {
        validate_where_document(where_document)?;
        ctx.check()?;

        let collections = self.collections.read().await;
        let collection = collections
            .get(dataset_id)
            .ok_or_else(|| StoreError::DatasetNotFound(dataset_id.to_string()))?;
        Ok(collection
            .documents
            .iter()
            .filter(|doc| doc.matches(where_filter, where_document))
            .cloned()
            .collect())
    }

    async fn add_documents(
        &self,
        ctx: &Context,
        dataset_id: &str,
        documents: &[Document],
    ) -> Result<Vec<String>, StoreError> {
        validate_dataset(dataset_id)?;
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let (prepared, dimension) =
            prepare_documents(ctx, &self.embedder, dataset_id, documents).await?;
        ctx.check()?;

        let mut collections = self.collections.write().await;
        let collection = collections.entry(dataset_id.to_string()).or_default();
        match (collection.embed_dimension, dimension) {
            (Some(existing), Some(new)) if existing != new => {
                return Err(StoreError::InvalidInput(format!(
                    "dataset {} stores {}-dimensional embeddings, got {}",
                    dataset_id, existing, new
                )));
            }
            (None, _) => collection.embed_dimension = dimension,
            _ => {}
        }

        let ids: Vec<String> = prepared.iter().map(|doc| doc.id.clone()).collect();
        for doc in prepared {
            collection.upsert(doc);
        }
        debug!(dataset_id, count = ids.len(), "Upserted documents");
        Ok(ids)
    }

    async fn delete_documents(
        &self,
        ctx: &Context,
        dataset_id: &str,
        where_filter: &Where,
    ) -> Result<(), StoreError> {
        validate_dataset(dataset_id)?;
        ctx.check()?;

        let mut collections = self.collections.write().await;
        if let Some(collection) = collections.get_mut(dataset_id) {
            let before = collection.documents.len();
            collection
                .documents
                .retain(|doc| !doc.matches(where_filter, &[]));
            debug!(
                dataset_id,
                removed = before - collection.documents.len(),
                "Deleted documents"
            );
        }
        Ok(())
    }

    async fn delete_dataset(&self, ctx: &Context, dataset_id: &str) -> Result<(), StoreError> {
        ctx.check()?;
        let mut collections = self.collections.write().await;
        collections
            .remove(dataset_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::DatasetNotFound(dataset_id.to_string()))
    }
}
