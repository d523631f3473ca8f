mod ollama;
mod openai;

pub use ollama::{OllamaConfig, OllamaProvider};
pub use openai::{OpenAIConfig, OpenAIProvider};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::context::Context;
use crate::error::{ConfigError, EmbeddingError};

/// Batch text → vector function handed out by a configured provider.
#[async_trait]
pub trait EmbeddingFunc: Send + Sync {
    /// Returns one vector per input text, in input order.
    async fn embed(&self, ctx: &Context, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// A pluggable embedding backend.
///
/// `configure` must succeed before `embedding_func` returns anything. The
/// returned function is an immutable snapshot: reconfiguring the provider or
/// switching models builds a new one and never changes functions already handed
/// out.
pub trait EmbeddingModelProvider: Send + Sync {
    fn name(&self) -> &str;

    fn embedding_func(&self) -> Result<Arc<dyn EmbeddingFunc>, EmbeddingError>;

    /// Validate and apply settings. Safe to call again after settings change.
    fn configure(&mut self) -> Result<(), EmbeddingError>;

    /// Effective settings as JSON, secrets redacted.
    fn config(&self) -> serde_json::Value;

    fn embedding_model_name(&self) -> &str;

    fn use_embedding_model(&mut self, model: &str);
}

pub const OLLAMA_PROVIDER: &str = "ollama";
pub const OPENAI_PROVIDER: &str = "openai";

pub fn provider_names() -> &'static [&'static str] {
    &[OLLAMA_PROVIDER, OPENAI_PROVIDER]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub ollama: OllamaConfig,
    pub openai: OpenAIConfig,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: OLLAMA_PROVIDER.to_string(),
            ollama: OllamaConfig::default(),
            openai: OpenAIConfig::default(),
        }
    }
}

/// Look up a provider by name. The provider is returned unconfigured.
pub fn get_provider(
    name: &str,
    config: &EmbeddingConfig,
) -> Result<Box<dyn EmbeddingModelProvider>, ConfigError> {
    match name.trim().to_ascii_lowercase().as_str() {
        OLLAMA_PROVIDER => Ok(Box::new(OllamaProvider::new(config.ollama.clone()))),
        OPENAI_PROVIDER => Ok(Box::new(OpenAIProvider::new(config.openai.clone()))),
        _ => Err(ConfigError::UnknownProvider(name.to_string())),
    }
}

/// Fail unless the backend returned exactly one vector per input.
pub fn check_embedding_count(expected: usize, got: usize) -> Result<(), EmbeddingError> {
    if expected != got {
        return Err(EmbeddingError::CountMismatch { expected, got });
    }
    Ok(())
}

/// Replace a secret with a marker that still shows whether it was set.
pub(crate) fn redact(secret: &Option<String>) -> serde_json::Value {
    match secret {
        Some(s) if !s.is_empty() => serde_json::Value::String("<redacted>".to_string()),
        _ => serde_json::Value::Null,
    }
}
