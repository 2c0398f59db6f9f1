use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::config::{LocalConfig, MistralConfig};
use crate::models::chat::ChatMessage;
use crate::utils::error::ApiError;

use super::embedding_service::EmbeddingService;
use super::llm_service::LlmService;
use super::mistral::MistralService;

/// Trait for embedding service
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model name, recorded alongside a persisted index
    fn model(&self) -> &str;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| ApiError::LlmError("Embedding server returned no vector".to_string()))
    }
}

/// Trait for LLM service
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, model: &str, messages: &[ChatMessage]) -> Result<String, ApiError>;
}

/// Clients for one chat turn.
#[derive(Clone)]
pub struct Providers {
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub llm: Arc<dyn LlmProvider>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Mistral,
    Local,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mistral => f.write_str("mistral"),
            Self::Local => f.write_str("local"),
        }
    }
}

/// Builds the clients for a turn from the credential the user supplied.
pub trait ProviderFactory: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn requires_api_key(&self) -> bool;

    fn connect(&self, api_key: Option<&str>) -> Result<Providers, ApiError>;
}

/// Hosted tier: every turn carries the user's Mistral key.
pub struct MistralProviders {
    client: reqwest::Client,
    config: MistralConfig,
}

impl MistralProviders {
    pub fn new(config: MistralConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(config.timeout_seconds))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            config,
        }
    }
}

impl ProviderFactory for MistralProviders {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mistral
    }

    fn requires_api_key(&self) -> bool {
        true
    }

    fn connect(&self, api_key: Option<&str>) -> Result<Providers, ApiError> {
        let api_key = api_key
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("Please enter your Mistral API key.".to_string()))?;

        let service = Arc::new(MistralService::new(
            self.client.clone(),
            self.config.clone(),
            api_key.to_string(),
        ));

        Ok(Providers {
            embedder: service.clone(),
            llm: service,
        })
    }
}

/// Local tier: one shared pair of clients, no credential.
pub struct LocalProviders {
    providers: Providers,
}

impl LocalProviders {
    pub fn new(config: LocalConfig) -> Self {
        Self {
            providers: Providers {
                embedder: Arc::new(EmbeddingService::new(&config)),
                llm: Arc::new(LlmService::new(config)),
            },
        }
    }
}

impl ProviderFactory for LocalProviders {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn requires_api_key(&self) -> bool {
        false
    }

    fn connect(&self, _api_key: Option<&str>) -> Result<Providers, ApiError> {
        Ok(self.providers.clone())
    }
}
