//! Document ingestion: loader → transformers → splitter → embedder → store.
//!
//! Each input is processed independently. A failure is reported as a
//! [`PipelineError`] naming the document and the stage it failed at, and never
//! affects sibling inputs of the same batch.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ProcessingConfig;
use crate::context::Context;
use crate::document::{keys, validate_dataset_id, Document, Metadata, Where};
use crate::embeddings::{check_embedding_count, EmbeddingFunc, EmbeddingModelProvider};
use crate::error::{ConfigError, EmbeddingError, Error, PipelineError, Stage, TransformError};
use crate::filetype;
use crate::loader::{default_document_loader, DocumentLoader};
use crate::store::Store;
use crate::textsplitter::{default_text_splitter, TextSplitter, TextSplitterOpts};
use crate::transformers::{apply_transformers, default_document_transformers, DocumentTransformer};

/// What to do when a transformer fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformErrorPolicy {
    /// Fail the document at the transform stage.
    #[default]
    Abort,
    /// Log the failure and continue with the transformer's input unchanged.
    SkipAndLog,
}

impl FromStr for TransformErrorPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "skip" | "skip_and_log" => Ok(Self::SkipAndLog),
            other => Err(ConfigError::invalid(
                "TRANSFORM_ERROR_POLICY",
                format!("expected abort or skip, got {:?}", other),
            )),
        }
    }
}

/// One document to ingest: a byte stream plus where it came from.
pub struct IngestInput {
    pub source_id: String,
    /// Extension (".md") or MIME type ("text/markdown").
    pub filetype: String,
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    /// Copied onto every chunk; provenance keys written by the pipeline win.
    pub metadata: Metadata,
}

impl IngestInput {
    pub fn new(
        source_id: impl Into<String>,
        filetype: impl Into<String>,
        reader: Box<dyn AsyncRead + Send + Unpin>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            filetype: filetype.into(),
            reader,
            metadata: Metadata::new(),
        }
    }

    pub fn from_bytes(source_id: impl Into<String>, filetype: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::new(source_id, filetype, Box::new(std::io::Cursor::new(bytes)))
    }

    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Self::new(
            path.display().to_string(),
            filetype::from_path(path),
            Box::new(file),
        ))
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Outcome of a successful ingest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub source_id: String,
    pub dataset_id: String,
    pub loaded: usize,
    pub transformed: usize,
    pub chunks: usize,
    pub stored_ids: Vec<String>,
}

fn at_stage<E: Into<Error>>(document_id: &str, stage: Stage) -> impl FnOnce(E) -> PipelineError + '_ {
    move |e| PipelineError::new(document_id, stage, e)
}

/// Stable id for a source within a dataset, so re-ingesting overwrites.
pub fn document_id_for(dataset_id: &str, source_id: &str) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_URL,
        format!("{}/{}", dataset_id, source_id).as_bytes(),
    )
    .to_string()
}

pub struct IngestPipelineBuilder {
    dataset_id: String,
    store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingFunc>,
    loaders: HashMap<String, Arc<dyn DocumentLoader>>,
    splitter: Option<Box<dyn TextSplitter>>,
    transformers: Option<Vec<Box<dyn DocumentTransformer>>>,
    splitter_opts: TextSplitterOpts,
    transform_error_policy: TransformErrorPolicy,
    embedding_batch_size: usize,
    max_concurrent_documents: usize,
}

impl IngestPipelineBuilder {
    /// Use `loader` for `filetype`, taking precedence over the default loader.
    pub fn with_loader(mut self, filetype: &str, loader: Arc<dyn DocumentLoader>) -> Self {
        self.loaders.insert(filetype::normalize(filetype), loader);
        self
    }

    /// Use one splitter for every file type.
    pub fn with_text_splitter(mut self, splitter: Box<dyn TextSplitter>) -> Self {
        self.splitter = Some(splitter);
        self
    }

    /// Replace the per-file-type default transformers. An empty list disables
    /// transformation.
    pub fn with_transformers(mut self, transformers: Vec<Box<dyn DocumentTransformer>>) -> Self {
        self.transformers = Some(transformers);
        self
    }

    pub fn with_splitter_opts(mut self, opts: TextSplitterOpts) -> Self {
        self.splitter_opts = opts;
        self
    }

    pub fn with_transform_error_policy(mut self, policy: TransformErrorPolicy) -> Self {
        self.transform_error_policy = policy;
        self
    }

    pub fn with_embedding_batch_size(mut self, size: usize) -> Self {
        self.embedding_batch_size = size;
        self
    }

    pub fn with_max_concurrent_documents(mut self, max: usize) -> Self {
        self.max_concurrent_documents = max;
        self
    }

    pub fn with_processing(self, processing: &ProcessingConfig) -> Self {
        self.with_transform_error_policy(processing.transform_error_policy)
            .with_embedding_batch_size(processing.embedding_batch_size)
            .with_max_concurrent_documents(processing.max_concurrent_documents)
    }

    pub fn build(self) -> Result<IngestPipeline, ConfigError> {
        validate_dataset_id(&self.dataset_id).map_err(|e| ConfigError::invalid("dataset", e))?;
        self.splitter_opts
            .validate()
            .map_err(|e| ConfigError::invalid("TEXT_SPLITTER_CHUNK_SIZE", e))?;
        if self.embedding_batch_size == 0 {
            return Err(ConfigError::invalid("EMBEDDING_BATCH_SIZE", "must be positive"));
        }
        if self.max_concurrent_documents == 0 {
            return Err(ConfigError::invalid("MAX_CONCURRENT_DOCUMENTS", "must be positive"));
        }

        Ok(IngestPipeline {
            dataset_id: self.dataset_id,
            store: self.store,
            embedder: self.embedder,
            loaders: self.loaders,
            splitter: self.splitter,
            transformers: self.transformers,
            splitter_opts: self.splitter_opts,
            transform_error_policy: self.transform_error_policy,
            embedding_batch_size: self.embedding_batch_size,
            max_concurrent_documents: self.max_concurrent_documents,
        })
    }
}

/// Ingests documents into one dataset.
pub struct IngestPipeline {
    dataset_id: String,
    store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingFunc>,
    loaders: HashMap<String, Arc<dyn DocumentLoader>>,
    splitter: Option<Box<dyn TextSplitter>>,
    transformers: Option<Vec<Box<dyn DocumentTransformer>>>,
    splitter_opts: TextSplitterOpts,
    transform_error_policy: TransformErrorPolicy,
    embedding_batch_size: usize,
    max_concurrent_documents: usize,
}

impl IngestPipeline {
    pub fn builder(
        dataset_id: impl Into<String>,
        store: Arc<dyn Store>,
        embedder: Arc<dyn EmbeddingFunc>,
    ) -> IngestPipelineBuilder {
        let processing = ProcessingConfig::default();
        IngestPipelineBuilder {
            dataset_id: dataset_id.into(),
            store,
            embedder,
            loaders: HashMap::new(),
            splitter: None,
            transformers: None,
            splitter_opts: TextSplitterOpts::default(),
            transform_error_policy: processing.transform_error_policy,
            embedding_batch_size: processing.embedding_batch_size,
            max_concurrent_documents: processing.max_concurrent_documents,
        }
    }

    /// Start a builder that embeds with the provider's current embedding
    /// function. Fails when the provider has not been configured.
    pub fn builder_for_provider(
        dataset_id: impl Into<String>,
        store: Arc<dyn Store>,
        provider: &dyn EmbeddingModelProvider,
    ) -> Result<IngestPipelineBuilder, EmbeddingError> {
        let embedder = provider.embedding_func()?;
        debug!(provider = provider.name(), model = provider.embedding_model_name(), "Using provider embeddings");
        Ok(Self::builder(dataset_id, store, embedder))
    }

    pub fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    fn loader_for(&self, filetype: &str) -> Arc<dyn DocumentLoader> {
        self.loaders
            .get(&filetype::normalize(filetype))
            .cloned()
            .unwrap_or_else(|| default_document_loader(filetype))
    }

    fn transform(
        &self,
        transformers: &[&dyn DocumentTransformer],
        docs: Vec<Document>,
    ) -> Result<Vec<Document>, TransformError> {
        match self.transform_error_policy {
            TransformErrorPolicy::Abort => apply_transformers(transformers.iter().copied(), docs),
            TransformErrorPolicy::SkipAndLog => {
                let mut docs = docs;
                for transformer in transformers {
                    match transformer.transform(docs.clone()) {
                        Ok(out) => docs = out,
                        Err(e) => warn!(
                            transformer = transformer.name(),
                            error = %e,
                            "Skipping failed transformer"
                        ),
                    }
                }
                Ok(docs)
            }
        }
    }

    async fn embed_chunks(&self, ctx: &Context, chunks: &mut [Document]) -> Result<(), EmbeddingError> {
        for batch in chunks.chunks_mut(self.embedding_batch_size) {
            let texts: Vec<String> = batch.iter().map(|doc| doc.content.clone()).collect();
            debug!(batch = texts.len(), "Embedding chunk batch");
            let vectors = self.embedder.embed(ctx, &texts).await?;
            check_embedding_count(texts.len(), vectors.len())?;
            for (doc, vector) in batch.iter_mut().zip(vectors) {
                doc.set_embedding(vector);
            }
        }
        Ok(())
    }

    /// Run one input through every stage and persist its chunks.
    pub async fn ingest(&self, ctx: &Context, input: IngestInput) -> Result<IngestReport, PipelineError> {
        let document_id = document_id_for(&self.dataset_id, &input.source_id);
        let result = self.run_stages(ctx, &document_id, input).await;
        match &result {
            Ok(report) => info!(
                document_id = %report.document_id,
                source = %report.source_id,
                chunks = report.chunks,
                "Ingested document"
            ),
            Err(e) => error!(document_id = %e.document_id, stage = %e.stage, error = %e.source, "Ingestion failed"),
        }
        result
    }

    async fn run_stages(
        &self,
        ctx: &Context,
        document_id: &str,
        mut input: IngestInput,
    ) -> Result<IngestReport, PipelineError> {
        let filetype = filetype::normalize(&input.filetype);

        // Load
        let loader = self.loader_for(&filetype);
        debug!(loader = loader.name(), filetype = %filetype, "Selected loader");
        let mut loaded = loader
            .load(ctx, &mut *input.reader)
            .await
            .map_err(at_stage(document_id, Stage::Load))?;

        let part_count = loaded.len();
        for (i, doc) in loaded.iter_mut().enumerate() {
            doc.id = if part_count == 1 {
                document_id.to_string()
            } else {
                format!("{}-part{}", document_id, i)
            };
            for (key, value) in &input.metadata {
                doc.metadata.insert(key.clone(), value.clone());
            }
            doc.metadata
                .insert(keys::DOCUMENT_ID.to_string(), document_id.into());
            doc.metadata
                .insert(keys::SOURCE.to_string(), input.source_id.clone().into());
            doc.metadata
                .insert(keys::FILETYPE.to_string(), filetype.clone().into());
        }

        // Transform
        ctx.check().map_err(at_stage(document_id, Stage::Transform))?;
        let defaults;
        let transformers: Vec<&dyn DocumentTransformer> = match &self.transformers {
            Some(list) => list.iter().map(|t| t.as_ref()).collect(),
            None => {
                defaults = default_document_transformers(&filetype);
                defaults.iter().map(|t| t.as_ref()).collect()
            }
        };
        let transformed = self
            .transform(&transformers, loaded)
            .map_err(at_stage(document_id, Stage::Transform))?;
        let transformed_count = transformed.len();
        debug!(before = part_count, after = transformed_count, "Transformed documents");

        // Split
        ctx.check().map_err(at_stage(document_id, Stage::Split))?;
        let default_splitter;
        let splitter: &dyn TextSplitter = match &self.splitter {
            Some(splitter) => splitter.as_ref(),
            None => {
                default_splitter = default_text_splitter(&filetype, Some(&self.splitter_opts));
                default_splitter.as_ref()
            }
        };
        let mut chunks = splitter
            .split_documents(transformed)
            .map_err(at_stage(document_id, Stage::Split))?;
        debug!(splitter = splitter.name(), chunks = chunks.len(), "Split documents");

        // Embed
        if !chunks.is_empty() {
            self.embed_chunks(ctx, &mut chunks)
                .await
                .map_err(at_stage(document_id, Stage::Embed))?;
        }

        // Store, replacing whatever an earlier ingest of this source left behind
        let previous: Where = [(keys::DOCUMENT_ID.to_string(), document_id.to_string())].into();
        self.store
            .delete_documents(ctx, &self.dataset_id, &previous)
            .await
            .map_err(at_stage(document_id, Stage::Store))?;
        let stored_ids = if chunks.is_empty() {
            Vec::new()
        } else {
            self.store
                .add_documents(ctx, &self.dataset_id, &chunks)
                .await
                .map_err(at_stage(document_id, Stage::Store))?
        };

        Ok(IngestReport {
            document_id: document_id.to_string(),
            source_id: input.source_id,
            dataset_id: self.dataset_id.clone(),
            loaded: part_count,
            transformed: transformed_count,
            chunks: chunks.len(),
            stored_ids,
        })
    }

    /// Ingest many inputs, at most `max_concurrent_documents` at a time. Results
    /// are returned in input order; one failure does not stop the others.
    pub async fn ingest_batch(
        &self,
        ctx: &Context,
        inputs: Vec<IngestInput>,
    ) -> Vec<Result<IngestReport, PipelineError>> {
        info!(
            dataset_id = %self.dataset_id,
            inputs = inputs.len(),
            concurrency = self.max_concurrent_documents,
            "Starting batch ingestion"
        );
        stream::iter(inputs)
            .map(|input| self.ingest(ctx, input))
            .buffered(self.max_concurrent_documents)
            .collect()
            .await
    }
}
