pub mod config;
pub mod context;
pub mod document;
pub mod embeddings;
pub mod error;
pub mod filetype;
pub mod loader;
pub mod parser;
pub mod pipeline;
pub mod store;
pub mod textsplitter;
pub mod transformers;

pub use config::{Config, ProcessingConfig};
pub use context::Context;
pub use document::{keys, Dataset, DatasetGetOpts, Document, Metadata, Where, WhereDocument};
pub use embeddings::{get_provider, EmbeddingConfig, EmbeddingFunc, EmbeddingModelProvider};
pub use error::{
    ConfigError, EmbeddingError, Error, Interrupted, LoadError, PipelineError, SplitError, Stage,
    StoreError, TransformError,
};
pub use loader::{default_document_loader, DocumentLoader, PlainTextLoader};
pub use pipeline::{IngestInput, IngestPipeline, IngestReport, TransformErrorPolicy};
pub use store::{MemoryStore, QdrantStore, Store, VectorDBConfig};
pub use textsplitter::{default_text_splitter, TextSplitter, TextSplitterOpts};
pub use transformers::{default_document_transformers, DocumentTransformer, GenericTransformer};
