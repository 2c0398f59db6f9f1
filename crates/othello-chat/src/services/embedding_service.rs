use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::config::LocalConfig;
use crate::utils::error::ApiError;

use super::provider::EmbeddingProvider;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

/// Embeddings from a locally hosted server.
#[derive(Clone)]
pub struct EmbeddingService {
    client: Client,
    url: String,
    model: String,
}

impl EmbeddingService {
    pub fn new(config: &LocalConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(config.timeout_seconds))
                .build()
                .unwrap_or_else(|_| Client::new()),
            url: format!(
                "{}{}",
                config.base_url.trim_end_matches('/'),
                config.embedding_path
            ),
            model: config.embedding_model.clone(),
        }
    }

    async fn embed_internal(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        debug!("Generating {} embeddings via {}", texts.len(), self.url);

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .context("Failed to connect to embedding server")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding API error ({}): {}", status, body);
        }

        let json: Value = response
            .json()
            .await
            .context("Failed to parse embedding response as JSON")?;

        let embeddings = parse_embeddings(&json)?;

        if embeddings.len() != texts.len() {
            anyhow::bail!(
                "Embedding server returned {} vectors for {} inputs",
                embeddings.len(),
                texts.len()
            );
        }
        if embeddings.iter().any(|e| e.is_empty()) {
            anyhow::bail!("Generated embedding is empty");
        }

        Ok(embeddings)
    }
}

/// Accepts the OpenAI shape (`{"data": [{"embedding": [...]}]}`), the
/// llama.cpp shapes (`[{"embedding": [...]}]`, `{"embedding": [...]}`) and
/// the ollama batch shape (`{"embeddings": [[...]]}`).
fn parse_embeddings(json: &Value) -> Result<Vec<Vec<f32>>> {
    fn floats(value: &Value) -> Option<Vec<f32>> {
        let arr = value.as_array()?;
        // llama.cpp sometimes nests a single vector: [[...]]
        if let Some(inner) = arr.first().and_then(Value::as_array) {
            if arr.len() == 1 {
                return Some(inner.iter().filter_map(|v| v.as_f64().map(|f| f as f32)).collect());
            }
        }
        Some(arr.iter().filter_map(|v| v.as_f64().map(|f| f as f32)).collect())
    }

    let items: Vec<&Value> = if let Some(data) = json.get("data").and_then(Value::as_array) {
        data.iter().collect()
    } else if let Some(list) = json.get("embeddings").and_then(Value::as_array) {
        return list
            .iter()
            .map(|v| floats(v).context("Invalid vector in 'embeddings'"))
            .collect();
    } else if let Some(arr) = json.as_array() {
        arr.iter().collect()
    } else if json.get("embedding").is_some() {
        vec![json]
    } else {
        anyhow::bail!("Unrecognized embedding response format: {}", json);
    };

    items
        .into_iter()
        .map(|item| {
            item.get("embedding")
                .and_then(floats)
                .with_context(|| format!("Missing 'embedding' field in {}", item))
        })
        .collect()
}

#[async_trait]
impl EmbeddingProvider for EmbeddingService {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.embed_internal(texts)
            .await
            .map_err(|e| ApiError::LlmError(e.to_string()))
    }
}
