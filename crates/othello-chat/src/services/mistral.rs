use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::MistralConfig;
use crate::models::chat::ChatMessage;
use crate::utils::error::ApiError;

use super::provider::{EmbeddingProvider, LlmProvider};

/// Mistral La Plateforme client bound to one user's API key.
#[derive(Clone)]
pub struct MistralService {
    client: Client,
    config: MistralConfig,
    api_key: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

impl MistralService {
    pub fn new(client: Client, config: MistralConfig, api_key: String) -> Self {
        Self {
            client,
            config,
            api_key,
        }
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<reqwest::Response, ApiError> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::LlmError(format!("Mistral network error: {}", e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ApiError::Unauthorized(
                "Mistral rejected the API key.".to_string(),
            ));
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::LlmError(format!(
                "Mistral API error ({}): {}",
                status, text
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl EmbeddingProvider for MistralService {
    fn model(&self) -> &str {
        &self.config.embedding_model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Embedding {} texts with {}", texts.len(), self.config.embedding_model);

        let request = EmbeddingRequest {
            model: &self.config.embedding_model,
            input: texts,
        };

        let body: EmbeddingResponse = self
            .post("/v1/embeddings", &request)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::LlmError(format!("Failed to parse Mistral embedding: {}", e)))?;

        if body.data.len() != texts.len() {
            return Err(ApiError::LlmError(format!(
                "Mistral returned {} embeddings for {} inputs",
                body.data.len(),
                texts.len()
            )));
        }

        let mut data = body.data;
        data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl LlmProvider for MistralService {
    async fn generate(&self, model: &str, messages: &[ChatMessage]) -> Result<String, ApiError> {
        debug!("Mistral chat completion: model={}, messages={}", model, messages.len());

        let request = ChatRequest { model, messages };

        let body: ChatResponse = self
            .post("/v1/chat/completions", &request)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::LlmError(format!("Failed to parse Mistral response: {}", e)))?;

        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ApiError::LlmError("No choices returned from Mistral".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(server: &MockServer) -> MistralService {
        let config = MistralConfig {
            base_url: server.uri(),
            ..MistralConfig::default()
        };
        MistralService::new(Client::new(), config, "sk-test".to_string())
    }

    #[tokio::test]
    async fn test_embed_batch_orders_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"index": 1, "embedding": [0.0, 1.0]},
                    {"index": 0, "embedding": [1.0, 0.0]}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let embeddings = service(&server)
            .embed_batch(&["first".to_string(), "second".to_string()])
            .await
            .unwrap();

        assert_eq!(embeddings, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn test_rejected_key_is_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "Unauthorized"})))
            .mount(&server)
            .await;

        let err = service(&server).embed("Iago").await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_generate_returns_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "Iago is Othello's ensign."}}]
            })))
            .mount(&server)
            .await;

        let answer = service(&server)
            .generate("mistral-small-latest", &[ChatMessage::user("Who is Iago?")])
            .await
            .unwrap();

        assert_eq!(answer, "Iago is Othello's ensign.");
    }

    #[tokio::test]
    async fn test_server_error_surfaces_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model overloaded"))
            .mount(&server)
            .await;

        let err = service(&server)
            .generate("mistral-large-latest", &[ChatMessage::user("?")])
            .await
            .unwrap_err();

        match err {
            ApiError::LlmError(msg) => assert!(msg.contains("model overloaded")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
