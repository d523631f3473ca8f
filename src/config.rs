use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

use crate::embeddings::{EmbeddingConfig, OllamaConfig, OpenAIConfig};
use crate::error::ConfigError;
use crate::pipeline::TransformErrorPolicy;
use crate::store::VectorDBConfig;
use crate::textsplitter::{TextSplitterOpts, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    pub max_concurrent_documents: usize,
    pub embedding_batch_size: usize,
    pub transform_error_policy: TransformErrorPolicy,
    pub log_level: String,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_documents: 4,
            embedding_batch_size: 32,
            transform_error_policy: TransformErrorPolicy::Abort,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub embedding: EmbeddingConfig,
    pub vector_db: VectorDBConfig,
    pub text_splitter: TextSplitterOpts,
    pub processing: ProcessingConfig,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse `key`, falling back to `default` when unset. A set but malformed
/// value is an error.
fn parse_var<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_var(key) {
        Some(raw) => raw.trim().parse().map_err(|e| ConfigError::invalid(key, e)),
        None => Ok(default),
    }
}

fn parse_optional_var<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional_var(key)
        .map(|raw| raw.trim().parse().map_err(|e| ConfigError::invalid(key, e)))
        .transpose()
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let provider = var_or("EMBEDDING_PROVIDER", "ollama").trim().to_ascii_lowercase();
        let model = optional_var("EMBEDDING_MODEL");

        // Load embedding config
        let ollama_defaults = OllamaConfig::default();
        let ollama = OllamaConfig {
            model: model.clone().unwrap_or(ollama_defaults.model),
            host: var_or("OLLAMA_HOST", &ollama_defaults.host),
            port: parse_var("OLLAMA_PORT", ollama_defaults.port)?,
        };
        ollama.get_url()?;

        let openai_defaults = OpenAIConfig::default();
        let openai = OpenAIConfig {
            model: model.unwrap_or(openai_defaults.model),
            base_url: var_or("OPENAI_BASE_URL", &openai_defaults.base_url),
            api_key: optional_var("OPENAI_API_KEY"),
            dimensions: parse_optional_var("EMBEDDING_DIMENSIONS")?,
        };
        openai.embeddings_url()?;

        let embedding = EmbeddingConfig {
            provider,
            ollama,
            openai,
        };

        // Load vector DB config
        let vector_db_defaults = VectorDBConfig::default();
        let vector_db = VectorDBConfig {
            host: var_or("QDRANT_HOST", &vector_db_defaults.host),
            port: parse_var("QDRANT_PORT", vector_db_defaults.port)?,
            vector_size: parse_optional_var("QDRANT_VECTOR_SIZE")?,
        };
        vector_db.get_url()?;

        let text_splitter = TextSplitterOpts {
            chunk_size: parse_var("TEXT_SPLITTER_CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?,
            chunk_overlap: parse_var("TEXT_SPLITTER_CHUNK_OVERLAP", DEFAULT_CHUNK_OVERLAP)?,
            ignore_heading_only: true,
        };
        text_splitter
            .validate()
            .map_err(|e| ConfigError::invalid("TEXT_SPLITTER_CHUNK_OVERLAP", e))?;

        // Load processing config
        let processing_defaults = ProcessingConfig::default();
        let processing = ProcessingConfig {
            max_concurrent_documents: parse_var(
                "MAX_CONCURRENT_DOCUMENTS",
                processing_defaults.max_concurrent_documents,
            )?,
            embedding_batch_size: parse_var(
                "EMBEDDING_BATCH_SIZE",
                processing_defaults.embedding_batch_size,
            )?,
            transform_error_policy: parse_var(
                "TRANSFORM_ERROR_POLICY",
                processing_defaults.transform_error_policy,
            )?,
            log_level: var_or("LOG_LEVEL", &processing_defaults.log_level),
        };

        Ok(Self {
            embedding,
            vector_db,
            text_splitter,
            processing,
        })
    }
}
