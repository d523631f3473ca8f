use async_trait::async_trait;
use qdrant_client::{
    config::QdrantConfig,
    qdrant::{
        points_selector::PointsSelectorOneOf, value::Kind, vectors_config::Config, Condition,
        CountPoints, CreateCollection, DeleteCollection, DeletePoints, Distance, Filter,
        GetCollectionInfoRequest, ListValue, PointId, PointStruct, PointsSelector, ScrollPoints,
        SearchPoints, Struct, UpsertPoints, Value, VectorParams, VectorsConfig,
        WithPayloadSelector, WriteOrdering,
    },
    Qdrant,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use crate::context::Context;
use crate::document::{
    keys, Dataset, DatasetGetOpts, Document, Metadata, Where, WhereDocument, WhereDocumentOperator,
};
use crate::embeddings::EmbeddingFunc;
use crate::error::{ConfigError, StoreError};
use crate::store::{
    embed_query, prepare_documents, validate_dataset, validate_num_documents,
    validate_where_document, Store,
};

/// Payload keys holding the document itself; everything else is metadata.
const ID_KEY: &str = "_id";
const CONTENT_KEY: &str = "_content";

const SCROLL_PAGE_SIZE: u32 = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorDBConfig {
    pub host: String,
    pub port: u16,
    /// Expected embedding size. `None` takes the size of the first batch.
    pub vector_size: Option<usize>,
}

impl VectorDBConfig {
    /// Get the full URL for the Qdrant service
    pub fn get_url(&self) -> Result<String, ConfigError> {
        let url = if self.host.starts_with("http://") || self.host.starts_with("https://") {
            format!("{}:{}", self.host.trim_end_matches('/'), self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        };

        // Validate the URL
        Url::parse(&url).map_err(|e| ConfigError::invalid("QDRANT_HOST", e))?;

        Ok(url)
    }
}

impl Default for VectorDBConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6334,
            vector_size: None,
        }
    }
}

fn backend(e: impl Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Qdrant-backed store; one collection per dataset, cosine distance.
pub struct QdrantStore {
    client: Qdrant,
    config: VectorDBConfig,
    embedder: Arc<dyn EmbeddingFunc>,
}

impl QdrantStore {
    pub fn new(config: VectorDBConfig, embedder: Arc<dyn EmbeddingFunc>) -> Result<Self, StoreError> {
        let url = config.get_url().map_err(backend)?;
        let client = Qdrant::new(QdrantConfig::from_url(&url)).map_err(backend)?;

        Ok(Self {
            client,
            config,
            embedder,
        })
    }

    async fn collection_names(&self, ctx: &Context) -> Result<Vec<String>, StoreError> {
        let response = ctx
            .run(async { self.client.list_collections().await.map_err(backend) })
            .await?;
        let mut names: Vec<String> = response.collections.into_iter().map(|c| c.name).collect();
        names.sort();
        Ok(names)
    }

    async fn ensure_exists(&self, ctx: &Context, dataset_id: &str) -> Result<(), StoreError> {
        if self.collection_names(ctx).await?.iter().any(|n| n == dataset_id) {
            Ok(())
        } else {
            Err(StoreError::DatasetNotFound(dataset_id.to_string()))
        }
    }

    async fn describe(&self, ctx: &Context, dataset_id: &str) -> Result<Dataset, StoreError> {
        let info = ctx
            .run(async {
                self.client
                    .collection_info(GetCollectionInfoRequest {
                        collection_name: dataset_id.to_string(),
                    })
                    .await
                    .map_err(backend)
            })
            .await?;

        let embed_dimension = info
            .result
            .and_then(|r| r.config)
            .and_then(|c| c.params)
            .and_then(|p| p.vectors_config)
            .and_then(|v| v.config)
            .and_then(|c| match c {
                Config::Params(params) => Some(params.size as usize),
                _ => None,
            });

        let count = ctx
            .run(async {
                self.client
                    .count(CountPoints {
                        collection_name: dataset_id.to_string(),
                        exact: Some(true),
                        ..Default::default()
                    })
                    .await
                    .map_err(backend)
            })
            .await?;

        Ok(Dataset {
            embed_dimension,
            document_count: count.result.map(|r| r.count as usize).unwrap_or_default(),
            ..Dataset::new(dataset_id)
        })
    }

    /// Initialize the collection with the given vector size
    async fn init_collection(&self, ctx: &Context, dataset_id: &str, size: usize) -> Result<(), StoreError> {
        let vectors_config = VectorsConfig {
            config: Some(Config::Params(VectorParams {
                size: size as u64,
                distance: Distance::Cosine.into(),
                ..Default::default()
            })),
        };

        let create_collection = CreateCollection {
            collection_name: dataset_id.to_string(),
            vectors_config: Some(vectors_config),
            ..Default::default()
        };

        ctx.run(async {
            self.client
                .create_collection(create_collection)
                .await
                .map_err(backend)
        })
        .await?;

        info!(dataset_id, size, "Created Qdrant collection");
        Ok(())
    }

    async fn scroll_all(
        &self,
        ctx: &Context,
        dataset_id: &str,
        filter: Option<Filter>,
    ) -> Result<Vec<Document>, StoreError> {
        let mut documents = Vec::new();
        let mut offset: Option<PointId> = None;
        loop {
            let request = ScrollPoints {
                collection_name: dataset_id.to_string(),
                filter: filter.clone(),
                offset: offset.take(),
                limit: Some(SCROLL_PAGE_SIZE),
                with_payload: Some(WithPayloadSelector::from(true)),
                ..Default::default()
            };
            let response = ctx
                .run(async { self.client.scroll(request).await.map_err(backend) })
                .await?;

            documents.extend(response.result.into_iter().map(|p| payload_to_document(p.payload)));
            match response.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        Ok(documents)
    }
}

/// Deterministic point id so re-ingesting a document overwrites its point.
fn point_id(document_id: &str) -> PointId {
    PointId::from(Uuid::new_v5(&Uuid::NAMESPACE_OID, document_id.as_bytes()).to_string())
}

/// A metadata `where` entry as a keyword match. Values that also read as an
/// integer or bool match either representation.
fn where_condition(key: &str, value: &str) -> Condition {
    let mut alternatives = vec![Condition::matches(key, value.to_string())];
    if let Ok(n) = value.parse::<i64>() {
        alternatives.push(Condition::matches(key, n));
    }
    if let Ok(b) = value.parse::<bool>() {
        alternatives.push(Condition::matches(key, b));
    }
    if alternatives.len() == 1 {
        alternatives.remove(0)
    } else {
        Filter::should(alternatives).into()
    }
}

/// Content predicates as text matches on the content payload field. Without a
/// full-text index on that field Qdrant matches the text as a substring.
fn where_document_condition(where_document: &WhereDocument) -> Condition {
    let value = where_document.value.clone();
    let children = where_document.where_documents.iter().map(where_document_condition);
    match where_document.operator {
        WhereDocumentOperator::Contains => Condition::matches_text(CONTENT_KEY, value),
        WhereDocumentOperator::NotContains => {
            Filter::must_not([Condition::matches_text(CONTENT_KEY, value)]).into()
        }
        WhereDocumentOperator::And => Filter::must(children).into(),
        WhereDocumentOperator::Or => Filter::should(children).into(),
    }
}

/// Both filter kinds combined conjunctively, or `None` when there is nothing
/// to filter on.
fn build_filter(where_filter: &Where, where_document: &[WhereDocument]) -> Option<Filter> {
    let conditions: Vec<Condition> = where_filter
        .iter()
        .map(|(key, value)| where_condition(key, value))
        .chain(where_document.iter().map(where_document_condition))
        .collect();
    if conditions.is_empty() {
        None
    } else {
        Some(Filter::must(conditions))
    }
}

/// Metadata may not shadow the payload fields holding the document itself.
fn check_reserved_keys(documents: &[Document]) -> Result<(), StoreError> {
    for doc in documents {
        if let Some(key) = [ID_KEY, CONTENT_KEY]
            .into_iter()
            .find(|key| doc.metadata.contains_key(*key))
        {
            return Err(StoreError::InvalidInput(format!(
                "document {} uses reserved metadata key {:?}",
                doc.id, key
            )));
        }
    }
    Ok(())
}

fn json_to_qdrant(value: serde_json::Value) -> Value {
    let kind = match value {
        serde_json::Value::Null => Kind::NullValue(0),
        serde_json::Value::Bool(b) => Kind::BoolValue(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Kind::IntegerValue(i),
            None => Kind::DoubleValue(n.as_f64().unwrap_or_default()),
        },
        serde_json::Value::String(s) => Kind::StringValue(s),
        serde_json::Value::Array(items) => Kind::ListValue(ListValue {
            values: items.into_iter().map(json_to_qdrant).collect(),
        }),
        serde_json::Value::Object(fields) => Kind::StructValue(Struct {
            fields: fields
                .into_iter()
                .map(|(k, v)| (k, json_to_qdrant(v)))
                .collect(),
        }),
    };
    Value { kind: Some(kind) }
}

fn qdrant_to_json(value: Value) -> serde_json::Value {
    match value.kind {
        None | Some(Kind::NullValue(_)) => serde_json::Value::Null,
        Some(Kind::BoolValue(b)) => b.into(),
        Some(Kind::IntegerValue(i)) => i.into(),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(d)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Some(Kind::StringValue(s)) => s.into(),
        Some(Kind::ListValue(list)) => {
            serde_json::Value::Array(list.values.into_iter().map(qdrant_to_json).collect())
        }
        Some(Kind::StructValue(st)) => serde_json::Value::Object(
            st.fields
                .into_iter()
                .map(|(k, v)| (k, qdrant_to_json(v)))
                .collect(),
        ),
    }
}

fn document_to_payload(doc: &Document) -> HashMap<String, Value> {
    let mut payload: HashMap<String, Value> = doc
        .metadata
        .iter()
        .map(|(k, v)| (k.clone(), json_to_qdrant(v.clone())))
        .collect();
    payload.insert(ID_KEY.to_string(), json_to_qdrant(doc.id.clone().into()));
    payload.insert(CONTENT_KEY.to_string(), json_to_qdrant(doc.content.clone().into()));
    payload
}

fn payload_to_document(payload: HashMap<String, Value>) -> Document {
    let mut metadata: Metadata = payload
        .into_iter()
        .map(|(k, v)| (k, qdrant_to_json(v)))
        .collect();
    let mut take_string = |key: &str| match metadata.remove(key) {
        Some(serde_json::Value::String(s)) => s,
        _ => String::new(),
    };
    let id = take_string(ID_KEY);
    let content = take_string(CONTENT_KEY);
    Document {
        metadata,
        ..Document::new(id, content)
    }
}

#[async_trait]
impl Store for QdrantStore {
    async fn list_datasets(&self, ctx: &Context) -> Result<Vec<Dataset>, StoreError> {
        let mut datasets = Vec::new();
        for name in self.collection_names(ctx).await? {
            datasets.push(self.describe(ctx, &name).await?);
        }
        Ok(datasets)
    }

    async fn get_dataset(
        &self,
        ctx: &Context,
        dataset_id: &str,
        opts: &DatasetGetOpts,
    ) -> Result<Dataset, StoreError> {
        self.ensure_exists(ctx, dataset_id).await?;
        let mut dataset = self.describe(ctx, dataset_id).await?;
        if opts.include_documents {
            let documents = self.scroll_all(ctx, dataset_id, None).await?;
            dataset.documents = opts.page(documents);
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
        self.ensure_exists(ctx, collection).await?;

        let vector = embed_query(ctx, self.embedder.as_ref(), query).await?;

        let search_request = SearchPoints {
            collection_name: collection.to_string(),
            vector,
            limit: limit as u64,
            filter: build_filter(where_filter, where_document),
            with_payload: Some(WithPayloadSelector::from(true)),
            ..Default::default()
        };

        let response = ctx
            .run(async { self.client.search_points(search_request).await.map_err(backend) })
            .await?;

        let results: Vec<Document> = response
            .result
            .into_iter()
            .map(|point| {
                let mut doc = payload_to_document(point.payload);
                doc.metadata
                    .insert(keys::SIMILARITY.to_string(), f64::from(point.score).into());
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
        self.ensure_exists(ctx, dataset_id).await?;

        self.scroll_all(ctx, dataset_id, build_filter(where_filter, where_document))
            .await
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
        check_reserved_keys(documents)?;
        let (prepared, dimension) =
            prepare_documents(ctx, &self.embedder, dataset_id, documents).await?;
        let dimension = dimension.unwrap_or_default();

        if let Some(expected) = self.config.vector_size {
            if expected != dimension {
                return Err(StoreError::InvalidInput(format!(
                    "embedding size {} does not match configured vector size {}",
                    dimension, expected
                )));
            }
        }

        if self.collection_names(ctx).await?.iter().any(|n| n == dataset_id) {
            let existing = self.describe(ctx, dataset_id).await?.embed_dimension;
            if let Some(existing) = existing.filter(|&d| d != dimension) {
                return Err(StoreError::InvalidInput(format!(
                    "dataset {} stores {}-dimensional embeddings, got {}",
                    dataset_id, existing, dimension
                )));
            }
        } else {
            self.init_collection(ctx, dataset_id, dimension).await?;
        }

        let ids: Vec<String> = prepared.iter().map(|doc| doc.id.clone()).collect();
        let points: Vec<PointStruct> = prepared
            .into_iter()
            .map(|doc| {
                let payload = document_to_payload(&doc);
                PointStruct {
                    id: Some(point_id(&doc.id)),
                    payload,
                    vectors: doc.embedding.map(Into::into),
                }
            })
            .collect();

        let upsert_points = UpsertPoints {
            collection_name: dataset_id.to_string(),
            wait: Some(true),
            points,
            ordering: Some(WriteOrdering::default()),
            ..Default::default()
        };

        ctx.run(async { self.client.upsert_points(upsert_points).await.map_err(backend) })
            .await?;

        debug!(dataset_id, count = ids.len(), "Upserted points");
        Ok(ids)
    }

    async fn delete_documents(
        &self,
        ctx: &Context,
        dataset_id: &str,
        where_filter: &Where,
    ) -> Result<(), StoreError> {
        validate_dataset(dataset_id)?;
        if !self.collection_names(ctx).await?.iter().any(|n| n == dataset_id) {
            return Ok(());
        }

        let delete_points = DeletePoints {
            collection_name: dataset_id.to_string(),
            wait: Some(true),
            points: Some(PointsSelector {
                points_selector_one_of: Some(PointsSelectorOneOf::Filter(
                    build_filter(where_filter, &[]).unwrap_or_default(),
                )),
            }),
            ordering: Some(WriteOrdering::default()),
            ..Default::default()
        };
        ctx.run(async { self.client.delete_points(delete_points).await.map_err(backend) })
            .await?;

        debug!(dataset_id, "Deleted points");
        Ok(())
    }

    async fn delete_dataset(&self, ctx: &Context, dataset_id: &str) -> Result<(), StoreError> {
        self.ensure_exists(ctx, dataset_id).await?;
        ctx.run(async {
            self.client
                .delete_collection(DeleteCollection {
                    collection_name: dataset_id.to_string(),
                    ..Default::default()
                })
                .await
                .map_err(backend)
        })
        .await?;
        info!(dataset_id, "Deleted Qdrant collection");
        Ok(())
    }
}
