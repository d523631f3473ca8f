use std::fmt;

use thiserror::Error;

/// Raised when a [`Context`](crate::Context) is cancelled or its deadline passes.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    #[error("context cancelled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing setting: {0}")]
    Missing(String),

    #[error("Invalid setting {key}: {reason}")]
    Invalid { key: String, reason: String },

    #[error("Unknown embedding provider: {0}")]
    UnknownProvider(String),

    #[error("Provider {0} is not configured")]
    NotConfigured(String),
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

#[derive(Error, Debug)]
pub enum SplitError {
    #[error("Invalid splitter options: {0}")]
    InvalidOptions(String),
}

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Transformer {transformer} failed: {reason}")]
    Failed { transformer: String, reason: String },
}

impl TransformError {
    pub fn failed(transformer: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Failed {
            transformer: transformer.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Embedding backend error: {0}")]
    Backend(String),

    #[error("Embedding count mismatch: sent {expected} texts, got {got} vectors")]
    CountMismatch { expected: usize, got: usize },

    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Vector DB error: {0}")]
    Backend(String),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

/// Crate-level error, one variant per failure area.
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("load error: {0}")]
    Load(#[from] LoadError),

    #[error("split error: {0}")]
    Split(#[from] SplitError),

    #[error("transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

/// Pipeline stage at which a document failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load,
    Transform,
    Split,
    Embed,
    Store,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Load => "load",
            Stage::Transform => "transform",
            Stage::Split => "split",
            Stage::Embed => "embed",
            Stage::Store => "store",
        };
        f.write_str(name)
    }
}

/// A single document's ingestion failure, with enough context to retry or skip it.
#[derive(Error, Debug)]
#[error("ingestion of {document_id} failed at {stage} stage: {source}")]
pub struct PipelineError {
    pub document_id: String,
    pub stage: Stage,
    #[source]
    pub source: Error,
}

impl PipelineError {
    pub fn new(document_id: impl Into<String>, stage: Stage, source: impl Into<Error>) -> Self {
        Self {
            document_id: document_id.into(),
            stage,
            source: source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_configured_is_a_config_error() {
        let err: EmbeddingError = ConfigError::NotConfigured("ollama".to_string()).into();
        assert!(matches!(
            err,
            EmbeddingError::Config(ConfigError::NotConfigured(_))
        ));
        assert_eq!(err.to_string(), "Provider ollama is not configured");
    }

    #[test]
    fn test_pipeline_error_display() {
        let err = PipelineError::new(
            "notes.md",
            Stage::Embed,
            EmbeddingError::CountMismatch {
                expected: 3,
                got: 2,
            },
        );
        assert_eq!(
            err.to_string(),
            "ingestion of notes.md failed at embed stage: embedding error: \
             Embedding count mismatch: sent 3 texts, got 2 vectors"
        );
        assert!(matches!(err.source, Error::Embedding(_)));
    }

    #[test]
    fn test_interrupted_converts_into_every_io_area() {
        let load: LoadError = Interrupted::Cancelled.into();
        let embed: EmbeddingError = Interrupted::DeadlineExceeded.into();
        let store: StoreError = Interrupted::Cancelled.into();

        assert!(matches!(load, LoadError::Interrupted(Interrupted::Cancelled)));
        assert!(matches!(
            embed,
            EmbeddingError::Interrupted(Interrupted::DeadlineExceeded)
        ));
        assert_eq!(store.to_string(), "context cancelled");
    }
}
