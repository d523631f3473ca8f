use async_trait::async_trait;
use ollama_rs::{generation::options::GenerationOptions, Ollama};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::context::Context;
use crate::embeddings::{check_embedding_count, EmbeddingFunc, EmbeddingModelProvider, OLLAMA_PROVIDER};
use crate::error::{ConfigError, EmbeddingError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    pub model: String,
    pub host: String,
    pub port: u16,
}

impl OllamaConfig {
    /// Get the full URL for the Ollama service
    pub fn get_url(&self) -> Result<Url, ConfigError> {
        let url = if self.host.starts_with("http://") || self.host.starts_with("https://") {
            format!("{}:{}", self.host.trim_end_matches('/'), self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        };

        Url::parse(&url).map_err(|e| ConfigError::invalid("OLLAMA_HOST", e))
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            model: "nomic-embed-text".to_string(),
            host: "localhost".to_string(),
            port: 11434,
        }
    }
}

/// Embeddings from a local or remote Ollama server.
pub struct OllamaProvider {
    config: OllamaConfig,
    validated: Option<Url>,
    func: Option<Arc<OllamaEmbeddingFunc>>,
}

impl OllamaProvider {
    pub fn new(config: OllamaConfig) -> Self {
        Self {
            config,
            validated: None,
            func: None,
        }
    }

    pub fn settings_mut(&mut self) -> &mut OllamaConfig {
        &mut self.config
    }

    fn build_func(&self, url: &Url) -> Arc<OllamaEmbeddingFunc> {
        let host = format!("{}://{}", url.scheme(), url.host_str().unwrap_or("localhost"));
        Arc::new(OllamaEmbeddingFunc {
            client: Ollama::new(host, url.port().unwrap_or(self.config.port)),
            model: self.config.model.clone(),
        })
    }
}

impl EmbeddingModelProvider for OllamaProvider {
    fn name(&self) -> &str {
        OLLAMA_PROVIDER
    }

    fn embedding_func(&self) -> Result<Arc<dyn EmbeddingFunc>, EmbeddingError> {
        match &self.func {
            Some(func) => Ok(Arc::clone(func) as Arc<dyn EmbeddingFunc>),
            None => Err(ConfigError::NotConfigured(OLLAMA_PROVIDER.to_string()).into()),
        }
    }

    fn configure(&mut self) -> Result<(), EmbeddingError> {
        self.validated = None;
        self.func = None;

        if self.config.model.trim().is_empty() {
            return Err(ConfigError::Missing("EMBEDDING_MODEL".to_string()).into());
        }
        let url = self.config.get_url()?;
        if url.host_str().is_none() {
            return Err(ConfigError::invalid("OLLAMA_HOST", "URL has no host").into());
        }

        debug!(url = %url, model = %self.config.model, "Configured Ollama embedding provider");
        self.func = Some(self.build_func(&url));
        self.validated = Some(url);
        Ok(())
    }

    fn config(&self) -> serde_json::Value {
        serde_json::json!({
            "model": self.config.model,
            "host": self.config.host,
            "port": self.config.port,
        })
    }

    fn embedding_model_name(&self) -> &str {
        &self.config.model
    }

    fn use_embedding_model(&mut self, model: &str) {
        self.config.model = model.to_string();
        self.func = self.validated.as_ref().map(|url| self.build_func(url));
    }
}

pub struct OllamaEmbeddingFunc {
    client: Ollama,
    model: String,
}

#[async_trait]
impl EmbeddingFunc for OllamaEmbeddingFunc {
    async fn embed(&self, ctx: &Context, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            let response = ctx
                .run(async {
                    self.client
                        .generate_embeddings(
                            self.model.clone(),
                            text.clone(),
                            Some(GenerationOptions::default()),
                        )
                        .await
                        .map_err(|e| EmbeddingError::Backend(e.to_string()))
                })
                .await?;

            // Convert from Vec<f64> to Vec<f32>
            vectors.push(response.embeddings.into_iter().map(|x| x as f32).collect());
        }
        check_embedding_count(texts.len(), vectors.len())?;
        Ok(vectors)
    }
}
