use assert_fs::prelude::*;
use async_trait::async_trait;
use knowledge_datastore::{
    keys, ConfigError, Context, Dataset, DatasetGetOpts, Document, DocumentLoader,
    DocumentTransformer, EmbeddingError, EmbeddingFunc, EmbeddingModelProvider, Error,
    GenericTransformer, IngestInput, IngestPipeline, LoadError, MemoryStore, Stage, Store,
    StoreError, TransformError, TransformErrorPolicy, Where, WhereDocument,
};
use knowledge_datastore::loader::Reader;
use knowledge_datastore::pipeline::document_id_for;
use knowledge_datastore::textsplitter::RecursiveCharacterSplitter;
use knowledge_datastore::TextSplitterOpts;
use mockall::mock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

mock! {
    pub Embedder {}

    #[async_trait]
    impl EmbeddingFunc for Embedder {
        async fn embed(&self, ctx: &Context, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
    }
}

/// Embeds by text length so every vector is non-zero; counts calls.
#[derive(Default)]
struct LengthEmbedder {
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingFunc for LengthEmbedder {
    async fn embed(&self, _ctx: &Context, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| vec![1.0, t.len() as f32 / 100.0])
            .collect())
    }
}

/// Returns one vector too few for every batch.
struct ShortEmbedder;

#[async_trait]
impl EmbeddingFunc for ShortEmbedder {
    async fn embed(&self, _ctx: &Context, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().skip(1).map(|_| vec![1.0, 0.0]).collect())
    }
}

/// Emits one document per line.
struct LineLoader;

#[async_trait]
impl DocumentLoader for LineLoader {
    fn name(&self) -> &str {
        "lines"
    }

    async fn load(&self, _ctx: &Context, reader: Reader<'_>) -> Result<Vec<Document>, LoadError> {
        use tokio::io::AsyncReadExt;
        let mut text = String::new();
        reader.read_to_string(&mut text).await?;
        Ok(text.lines().map(Document::from_content).collect())
    }
}

fn setup() -> (Arc<LengthEmbedder>, Arc<MemoryStore>) {
    let embedder = Arc::new(LengthEmbedder::default());
    let store = Arc::new(MemoryStore::new(embedder.clone()));
    (embedder, store)
}

fn pipeline(embedder: Arc<LengthEmbedder>, store: Arc<MemoryStore>) -> IngestPipeline {
    IngestPipeline::builder("notes", store, embedder)
        .build()
        .unwrap()
}

const TWO_SECTIONS: &str = "# Empty\n\n# Usage\n\nRun the tool with a config file.\n";

#[tokio::test]
async fn test_markdown_end_to_end() {
    let (embedder, store) = setup();
    let pipeline = pipeline(embedder, store.clone());
    let ctx = Context::background();

    let input = IngestInput::from_bytes("guide.md", ".md", TWO_SECTIONS.as_bytes().to_vec())
        .with_metadata("team", "docs");
    let report = pipeline.ingest(&ctx, input).await.unwrap();

    // Only the section with a body becomes a chunk
    assert_eq!(report.chunks, 1);
    assert_eq!(report.stored_ids.len(), 1);
    assert_eq!(report.document_id, document_id_for("notes", "guide.md"));

    let dataset = store
        .get_dataset(&ctx, "notes", &DatasetGetOpts::with_documents())
        .await
        .unwrap();
    assert_eq!(dataset.document_count, 1);
    let chunk = &dataset.documents[0];
    assert!(chunk.content.starts_with("# Usage"));
    assert_eq!(chunk.metadata_str(keys::DOCUMENT_ID).unwrap(), report.document_id);
    assert_eq!(chunk.metadata_str(keys::SOURCE).unwrap(), "guide.md");
    assert_eq!(chunk.metadata_str(keys::FILETYPE).unwrap(), ".md");
    assert_eq!(chunk.metadata_str(keys::DATASET_ID).unwrap(), "notes");
    assert_eq!(chunk.metadata_str("team").unwrap(), "docs");
    assert!(chunk.embedding().is_some());
}

#[tokio::test]
async fn test_reingest_overwrites_chunks() {
    let (embedder, store) = setup();
    let pipeline = pipeline(embedder, store.clone());
    let ctx = Context::background();

    for _ in 0..2 {
        let input = IngestInput::from_bytes("guide.md", "text/markdown", TWO_SECTIONS.as_bytes().to_vec());
        pipeline.ingest(&ctx, input).await.unwrap();
    }

    let datasets = store.list_datasets(&ctx).await.unwrap();
    assert_eq!(datasets[0].document_count, 1);
}

#[tokio::test]
async fn test_reingest_drops_chunks_the_source_no_longer_has() {
    let (embedder, store) = setup();
    let pipeline = pipeline(embedder, store.clone());
    let ctx = Context::background();

    let first = IngestInput::from_bytes("guide.md", ".md", b"# A\n\nalpha\n\n# B\n\nbeta".to_vec());
    assert_eq!(pipeline.ingest(&ctx, first).await.unwrap().chunks, 2);
    let other = IngestInput::from_bytes("other.md", ".md", b"# C\n\ngamma".to_vec());
    pipeline.ingest(&ctx, other).await.unwrap();

    let second = IngestInput::from_bytes("guide.md", ".md", b"# A\n\nalpha v2".to_vec());
    assert_eq!(pipeline.ingest(&ctx, second).await.unwrap().chunks, 1);

    let docs = store.get_documents(&ctx, "notes", &Where::new(), &[]).await.unwrap();
    let mut contents: Vec<&str> = docs.iter().map(|d| d.content.as_str()).collect();
    contents.sort();
    assert_eq!(contents, vec!["# A\n\nalpha v2", "# C\n\ngamma"]);

    // A source that now yields nothing leaves nothing behind
    let emptied = IngestInput::from_bytes("guide.md", ".md", b"# A\n".to_vec());
    assert_eq!(pipeline.ingest(&ctx, emptied).await.unwrap().chunks, 0);
    let docs = store.get_documents(&ctx, "notes", &Where::new(), &[]).await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].content, "# C\n\ngamma");
}

#[tokio::test]
async fn test_heading_only_markdown_stores_nothing() {
    let (embedder, store) = setup();
    let pipeline = pipeline(embedder.clone(), store.clone());

    let input = IngestInput::from_bytes("empty.md", ".md", b"# Only a heading\n".to_vec());
    let report = pipeline.ingest(&Context::background(), input).await.unwrap();

    assert_eq!(report.transformed, 0);
    assert_eq!(report.chunks, 0);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    assert!(store.list_datasets(&Context::background()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_embeds_in_batches() {
    let (embedder, store) = setup();
    let pipeline = IngestPipeline::builder("notes", store, embedder.clone())
        .with_text_splitter(Box::new(RecursiveCharacterSplitter::new(TextSplitterOpts {
            chunk_size: 10,
            chunk_overlap: 0,
            ignore_heading_only: true,
        })))
        .with_embedding_batch_size(2)
        .build()
        .unwrap();

    let input = IngestInput::from_bytes("words.txt", ".txt", b"aaaa bbbb cccc dddd eeee".to_vec());
    let report = pipeline.ingest(&Context::background(), input).await.unwrap();

    assert_eq!(report.chunks, 3);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_binary_content_fails_at_load() {
    let (embedder, store) = setup();
    let pipeline = pipeline(embedder, store);

    let input = IngestInput::from_bytes("report.pdf", ".pdf", vec![0x25, 0x50, 0x44, 0x46, 0xff, 0xfe]);
    let err = pipeline.ingest(&Context::background(), input).await.unwrap_err();

    assert_eq!(err.stage, Stage::Load);
    assert_eq!(err.document_id, document_id_for("notes", "report.pdf"));
    assert!(matches!(err.source, Error::Load(LoadError::Parse(_))));
}

#[tokio::test]
async fn test_unrecognized_filetypes_load_as_text() {
    let (embedder, store) = setup();
    let pipeline = pipeline(embedder, store.clone());
    let ctx = Context::background();

    let inputs = [
        ("Makefile", "", "all:\n\techo hi"),
        ("main.rs", ".rs", "fn main() {}"),
        ("data.json", "application/json", "{\"a\": 1}"),
    ];
    for (source, filetype, body) in inputs {
        let input = IngestInput::from_bytes(source, filetype, body.as_bytes().to_vec());
        let report = pipeline.ingest(&ctx, input).await.unwrap();
        assert_eq!(report.chunks, 1, "wrong chunk count for {:?}", source);
    }

    let rust: Where = [(keys::FILETYPE.to_string(), ".rs".to_string())].into();
    let docs = store.get_documents(&ctx, "notes", &rust, &[]).await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].content, "fn main() {}");
}

#[tokio::test]
async fn test_injected_loader_takes_precedence() {
    let (embedder, store) = setup();
    let pipeline = IngestPipeline::builder("notes", store.clone(), embedder)
        .with_loader(".txt", Arc::new(LineLoader))
        .with_loader("application/pdf", Arc::new(LineLoader))
        .build()
        .unwrap();
    let ctx = Context::background();

    let report = pipeline
        .ingest(&ctx, IngestInput::from_bytes("a.txt", ".TXT", b"one\ntwo\nthree".to_vec()))
        .await
        .unwrap();
    assert_eq!(report.loaded, 3);
    assert_eq!(report.chunks, 3);

    let report = pipeline
        .ingest(&ctx, IngestInput::from_bytes("b.pdf", "application/pdf", b"page".to_vec()))
        .await
        .unwrap();
    assert_eq!(report.loaded, 1);
}

#[tokio::test]
async fn test_transform_error_aborts_by_default() {
    let (embedder, store) = setup();
    let failing: Box<dyn DocumentTransformer> = Box::new(GenericTransformer::named("broken", |_| {
        Err(TransformError::failed("broken", "boom"))
    }));
    let pipeline = IngestPipeline::builder("notes", store, embedder)
        .with_transformers(vec![failing])
        .build()
        .unwrap();

    let input = IngestInput::from_bytes("a.txt", ".txt", b"text".to_vec());
    let err = pipeline.ingest(&Context::background(), input).await.unwrap_err();
    assert_eq!(err.stage, Stage::Transform);
    assert!(matches!(err.source, Error::Transform(_)));
}

#[tokio::test]
async fn test_transform_error_skipped_under_skip_policy() {
    let (embedder, store) = setup();
    let failing: Box<dyn DocumentTransformer> = Box::new(GenericTransformer::named("broken", |_| {
        Err(TransformError::failed("broken", "boom"))
    }));
    let tagging: Box<dyn DocumentTransformer> = Box::new(GenericTransformer::new(|docs| {
        Ok(docs
            .into_iter()
            .map(|doc| doc.with_metadata("tagged", true))
            .collect())
    }));
    let pipeline = IngestPipeline::builder("notes", store.clone(), embedder)
        .with_transformers(vec![failing, tagging])
        .with_transform_error_policy(TransformErrorPolicy::SkipAndLog)
        .build()
        .unwrap();
    let ctx = Context::background();

    let input = IngestInput::from_bytes("a.txt", ".txt", b"text".to_vec());
    let report = pipeline.ingest(&ctx, input).await.unwrap();
    assert_eq!(report.chunks, 1);

    let tagged: Where = [("tagged".to_string(), "true".to_string())].into();
    let docs = store.get_documents(&ctx, "notes", &tagged, &[]).await.unwrap();
    assert_eq!(docs.len(), 1);
}

#[tokio::test]
async fn test_embedding_count_mismatch_fails_at_embed() {
    let store = Arc::new(MemoryStore::new(Arc::new(ShortEmbedder)));
    let pipeline = IngestPipeline::builder("notes", store, Arc::new(ShortEmbedder))
        .build()
        .unwrap();

    let input = IngestInput::from_bytes("a.txt", ".txt", b"text".to_vec());
    let err = pipeline.ingest(&Context::background(), input).await.unwrap_err();
    assert_eq!(err.stage, Stage::Embed);
    assert!(matches!(
        err.source,
        Error::Embedding(EmbeddingError::CountMismatch { expected: 1, got: 0 })
    ));
}

#[tokio::test]
async fn test_batch_failure_does_not_abort_siblings() {
    let (embedder, store) = setup();
    let pipeline = IngestPipeline::builder("notes", store.clone(), embedder)
        .with_max_concurrent_documents(2)
        .build()
        .unwrap();
    let ctx = Context::background();

    let inputs = vec![
        IngestInput::from_bytes("a.md", ".md", b"# A\n\nalpha".to_vec()),
        IngestInput::from_bytes("b.bin", ".bin", vec![0xff, 0xfe]),
        IngestInput::from_bytes("c.txt", ".txt", b"gamma".to_vec()),
    ];
    let results = pipeline.ingest_batch(&ctx, inputs).await;

    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    let err = results[1].as_ref().unwrap_err();
    assert_eq!(err.stage, Stage::Load);
    assert!(results[2].is_ok());

    let dataset = store
        .get_dataset(&ctx, "notes", &DatasetGetOpts::default())
        .await
        .unwrap();
    assert_eq!(dataset.document_count, 2);
}

#[tokio::test]
async fn test_cancelled_context_fails_document() {
    let (embedder, store) = setup();
    let pipeline = pipeline(embedder, store);
    let ctx = Context::background();
    ctx.cancel();

    let input = IngestInput::from_bytes("a.txt", ".txt", b"text".to_vec());
    let err = pipeline.ingest(&ctx, input).await.unwrap_err();
    assert_eq!(err.stage, Stage::Load);
}

#[tokio::test]
async fn test_ingest_from_path() {
    let temp = assert_fs::TempDir::new().unwrap();
    let file = temp.child("guide.MD");
    file.write_str(TWO_SECTIONS).unwrap();

    let (embedder, store) = setup();
    let pipeline = pipeline(embedder, store.clone());
    let ctx = Context::background();

    let input = IngestInput::from_path(file.path()).await.unwrap();
    assert_eq!(input.filetype, ".md");
    let report = pipeline.ingest(&ctx, input).await.unwrap();
    assert_eq!(report.chunks, 1);

    let results = store
        .similarity_search(&ctx, "run the tool", 5, "notes", &Where::new(), &[])
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].metadata.contains_key(keys::SIMILARITY));
}

#[tokio::test]
async fn test_ingest_from_tempfile() {
    use std::io::Write;

    let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
    write!(file, "plain text body").unwrap();

    let (embedder, store) = setup();
    let pipeline = pipeline(embedder, store);

    let input = IngestInput::from_path(file.path()).await.unwrap();
    let report = pipeline.ingest(&Context::background(), input).await.unwrap();
    assert_eq!(report.chunks, 1);
}

#[tokio::test]
async fn test_similarity_search_rejects_k_before_embedding() {
    let mut embedder = MockEmbedder::new();
    embedder.expect_embed().times(0);
    let store = MemoryStore::new(Arc::new(embedder));

    let err = store
        .similarity_search(&Context::background(), "query", 0, "notes", &Where::new(), &[])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidInput(_)));
}

#[tokio::test]
async fn test_pipeline_uses_injected_embedder_once_per_batch() {
    let mut embedder = MockEmbedder::new();
    embedder
        .expect_embed()
        .withf(|_, texts| texts.len() == 1)
        .times(1)
        .returning(|_, texts| Ok(texts.iter().map(|_| vec![0.5, 0.5]).collect()));
    let embedder = Arc::new(embedder);
    let store = Arc::new(MemoryStore::new(embedder.clone()));
    let pipeline = IngestPipeline::builder("notes", store, embedder)
        .build()
        .unwrap();

    let input = IngestInput::from_bytes("a.txt", ".txt", b"short".to_vec());
    let report = pipeline.ingest(&Context::background(), input).await.unwrap();
    assert_eq!(report.stored_ids.len(), 1);
}

#[test]
fn test_builder_rejects_invalid_settings() {
    let (embedder, store) = setup();
    assert!(IngestPipeline::builder("bad id!", store.clone(), embedder.clone())
        .build()
        .is_err());
    assert!(IngestPipeline::builder("notes", store.clone(), embedder.clone())
        .with_embedding_batch_size(0)
        .build()
        .is_err());
    assert!(IngestPipeline::builder("notes", store, embedder)
        .with_splitter_opts(TextSplitterOpts {
            chunk_size: 10,
            chunk_overlap: 10,
            ignore_heading_only: true,
        })
        .build()
        .is_err());
}

mock! {
    pub Store {}

    #[async_trait]
    impl Store for Store {
        async fn list_datasets(&self, ctx: &Context) -> Result<Vec<Dataset>, StoreError>;
        async fn get_dataset(
            &self,
            ctx: &Context,
            dataset_id: &str,
            opts: &DatasetGetOpts,
        ) -> Result<Dataset, StoreError>;
        async fn similarity_search(
            &self,
            ctx: &Context,
            query: &str,
            num_documents: i64,
            collection: &str,
            where_filter: &Where,
            where_document: &[WhereDocument],
        ) -> Result<Vec<Document>, StoreError>;
        async fn get_documents(
            &self,
            ctx: &Context,
            dataset_id: &str,
            where_filter: &Where,
            where_document: &[WhereDocument],
        ) -> Result<Vec<Document>, StoreError>;
        async fn add_documents(
            &self,
            ctx: &Context,
            dataset_id: &str,
            documents: &[Document],
        ) -> Result<Vec<String>, StoreError>;
        async fn delete_documents(
            &self,
            ctx: &Context,
            dataset_id: &str,
            where_filter: &Where,
        ) -> Result<(), StoreError>;
        async fn delete_dataset(&self, ctx: &Context, dataset_id: &str) -> Result<(), StoreError>;
    }
}

mock! {
    pub Provider {}

    impl EmbeddingModelProvider for Provider {
        fn name(&self) -> &str;
        fn embedding_func(&self) -> Result<Arc<dyn EmbeddingFunc>, EmbeddingError>;
        fn configure(&mut self) -> Result<(), EmbeddingError>;
        fn config(&self) -> serde_json::Value;
        fn embedding_model_name(&self) -> &str;
        fn use_embedding_model(&mut self, model: &str);
    }
}

#[tokio::test]
async fn test_store_receives_embedded_chunks() {
    let mut store = MockStore::new();
    let document_id = document_id_for("notes", "a.txt");
    store
        .expect_delete_documents()
        .withf(move |_, dataset_id, where_filter| {
            dataset_id == "notes"
                && where_filter.get(keys::DOCUMENT_ID) == Some(&document_id)
                && where_filter.len() == 1
        })
        .times(1)
        .returning(|_, _, _| Ok(()));
    store
        .expect_add_documents()
        .withf(|_, dataset_id, documents| {
            dataset_id == "notes"
                && documents.len() == 1
                && documents.iter().all(|doc| doc.embedding().is_some())
        })
        .times(1)
        .returning(|_, _, documents| Ok(documents.iter().map(|doc| doc.id.clone()).collect()));

    let pipeline = IngestPipeline::builder("notes", Arc::new(store), Arc::new(LengthEmbedder::default()))
        .build()
        .unwrap();
    let input = IngestInput::from_bytes("a.txt", ".txt", b"text".to_vec());
    let report = pipeline.ingest(&Context::background(), input).await.unwrap();
    assert_eq!(report.stored_ids, vec![format!("{}-0", report.document_id)]);
}

#[tokio::test]
async fn test_store_failure_is_reported_at_store_stage() {
    let mut store = MockStore::new();
    store.expect_delete_documents().returning(|_, _, _| Ok(()));
    store
        .expect_add_documents()
        .returning(|_, _, _| Err(StoreError::Backend("connection refused".to_string())));

    let pipeline = IngestPipeline::builder("notes", Arc::new(store), Arc::new(LengthEmbedder::default()))
        .build()
        .unwrap();
    let input = IngestInput::from_bytes("a.txt", ".txt", b"text".to_vec());
    let err = pipeline.ingest(&Context::background(), input).await.unwrap_err();

    assert_eq!(err.stage, Stage::Store);
    assert!(err.to_string().contains("connection refused"));
}

#[tokio::test]
async fn test_builder_for_unconfigured_provider_fails() {
    let mut provider = MockProvider::new();
    provider.expect_embedding_func().times(1).returning(|| {
        Err(ConfigError::NotConfigured("mock".to_string()).into())
    });

    let store = Arc::new(MockStore::new());
    let result = IngestPipeline::builder_for_provider("notes", store, &provider);
    assert!(matches!(
        result,
        Err(EmbeddingError::Config(ConfigError::NotConfigured(_)))
    ));
}

#[tokio::test]
async fn test_builder_for_provider_uses_its_embedding_func() {
    let mut provider = MockProvider::new();
    provider
        .expect_embedding_func()
        .times(1)
        .returning(|| Ok(Arc::new(LengthEmbedder::default()) as Arc<dyn EmbeddingFunc>));
    provider.expect_name().return_const("mock".to_string());
    provider
        .expect_embedding_model_name()
        .return_const("mock-model".to_string());

    let (_, store) = setup();
    let pipeline = IngestPipeline::builder_for_provider("notes", store, &provider)
        .unwrap()
        .build()
        .unwrap();
    let input = IngestInput::from_bytes("a.txt", ".txt", b"text".to_vec());
    let report = pipeline.ingest(&Context::background(), input).await.unwrap();
    assert_eq!(report.chunks, 1);
}
