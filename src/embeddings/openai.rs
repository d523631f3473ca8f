use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::context::Context;
use crate::embeddings::{
    check_embedding_count, redact, EmbeddingFunc, EmbeddingModelProvider, OPENAI_PROVIDER,
};
use crate::error::{ConfigError, EmbeddingError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    pub model: String,
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub dimensions: Option<usize>,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            dimensions: None,
        }
    }
}

impl OpenAIConfig {
    pub fn embeddings_url(&self) -> Result<Url, ConfigError> {
        let base = format!("{}/", self.base_url.trim_end_matches('/'));
        Url::parse(&base)
            .and_then(|url| url.join("embeddings"))
            .map_err(|e| ConfigError::invalid("OPENAI_BASE_URL", e))
    }
}

/// Embeddings from an OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAIProvider {
    config: OpenAIConfig,
    endpoint: Option<Url>,
    func: Option<Arc<OpenAIEmbeddingFunc>>,
}

impl OpenAIProvider {
    pub fn new(config: OpenAIConfig) -> Self {
        Self {
            config,
            endpoint: None,
            func: None,
        }
    }

    pub fn settings_mut(&mut self) -> &mut OpenAIConfig {
        &mut self.config
    }

    fn build_func(&self, endpoint: &Url, api_key: &str) -> Arc<OpenAIEmbeddingFunc> {
        Arc::new(OpenAIEmbeddingFunc {
            client: Client::new(),
            endpoint: endpoint.clone(),
            api_key: api_key.to_string(),
            model: self.config.model.clone(),
            dimensions: self.config.dimensions,
        })
    }
}

impl EmbeddingModelProvider for OpenAIProvider {
    fn name(&self) -> &str {
        OPENAI_PROVIDER
    }

    fn embedding_func(&self) -> Result<Arc<dyn EmbeddingFunc>, EmbeddingError> {
        match &self.func {
            Some(func) => Ok(Arc::clone(func) as Arc<dyn EmbeddingFunc>),
            None => Err(ConfigError::NotConfigured(OPENAI_PROVIDER.to_string()).into()),
        }
    }

    fn configure(&mut self) -> Result<(), EmbeddingError> {
        self.endpoint = None;
        self.func = None;

        let api_key = match self.config.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => key.to_string(),
            _ => return Err(ConfigError::Missing("OPENAI_API_KEY".to_string()).into()),
        };
        if self.config.model.trim().is_empty() {
            return Err(ConfigError::Missing("EMBEDDING_MODEL".to_string()).into());
        }
        if self.config.dimensions == Some(0) {
            return Err(ConfigError::invalid("EMBEDDING_DIMENSIONS", "must be positive").into());
        }
        let endpoint = self.config.embeddings_url()?;

        debug!(endpoint = %endpoint, model = %self.config.model, "Configured OpenAI embedding provider");
        self.func = Some(self.build_func(&endpoint, &api_key));
        self.endpoint = Some(endpoint);
        Ok(())
    }

    fn config(&self) -> serde_json::Value {
        serde_json::json!({
            "model": self.config.model,
            "base_url": self.config.base_url,
            "api_key": redact(&self.config.api_key),
            "dimensions": self.config.dimensions,
        })
    }

    fn embedding_model_name(&self) -> &str {
        &self.config.model
    }

    fn use_embedding_model(&mut self, model: &str) {
        self.config.model = model.to_string();
        self.func = match (&self.endpoint, self.config.api_key.as_deref()) {
            (Some(endpoint), Some(key)) => Some(self.build_func(endpoint, key)),
            _ => None,
        };
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

pub struct OpenAIEmbeddingFunc {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
    dimensions: Option<usize>,
}

/// Restore input order; the API is allowed to return items out of order.
fn into_ordered_vectors(mut data: Vec<EmbeddingData>) -> Vec<Vec<f32>> {
    data.sort_by_key(|d| d.index);
    data.into_iter().map(|d| d.embedding).collect()
}

#[async_trait]
impl EmbeddingFunc for OpenAIEmbeddingFunc {
    async fn embed(&self, ctx: &Context, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.dimensions,
        };

        let response: EmbeddingResponse = ctx
            .run(async {
                let response = self
                    .client
                    .post(self.endpoint.clone())
                    .bearer_auth(&self.api_key)
                    .json(&request)
                    .send()
                    .await
                    .map_err(|e| EmbeddingError::Backend(e.to_string()))?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(EmbeddingError::Backend(format!("HTTP {}: {}", status, body)));
                }

                response
                    .json::<EmbeddingResponse>()
                    .await
                    .map_err(|e| EmbeddingError::Backend(e.to_string()))
            })
            .await?;

        let vectors = into_ordered_vectors(response.data);
        check_embedding_count(texts.len(), vectors.len())?;
        Ok(vectors)
    }
}
