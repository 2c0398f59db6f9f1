use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{ModelTier, PromptsConfig, RagConfig};
use crate::models::chat::{AskRequest, ChatMessage, ConversationId, SourceExcerpt, TurnReply};
use crate::utils::error::ApiError;

use super::conversation::{ConversationStore, Exchange};
use super::index::{IndexManager, ScoredChunk};
use super::provider::{Providers, ProviderFactory};

/// Retrieval-augmented question answering over the indexed text.
pub struct ChatService {
    store: ConversationStore,
    index: Arc<IndexManager>,
    providers: Arc<dyn ProviderFactory>,
    rag: RagConfig,
    prompts: PromptsConfig,
    models: Vec<ModelTier>,
}

impl ChatService {
    pub fn new(
        store: ConversationStore,
        index: Arc<IndexManager>,
        providers: Arc<dyn ProviderFactory>,
        rag: RagConfig,
        prompts: PromptsConfig,
        models: Vec<ModelTier>,
    ) -> Self {
        Self {
            store,
            index,
            providers,
            rag,
            prompts,
            models,
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn models(&self) -> &[ModelTier] {
        &self.models
    }

    /// Omitted model means the first configured tier.
    pub fn resolve_model(&self, requested: Option<&str>) -> Result<String, ApiError> {
        match requested.map(str::trim).filter(|m| !m.is_empty()) {
            None => self
                .models
                .first()
                .map(|tier| tier.name.clone())
                .ok_or_else(|| ApiError::InternalError("No models configured".to_string())),
            Some(name) if self.models.iter().any(|tier| tier.name == name) => Ok(name.to_string()),
            Some(name) => Err(ApiError::BadRequest(format!("Unknown model: {}", name))),
        }
    }

    /// Answer one question inside a conversation.
    ///
    /// The conversation is only updated once the answer is complete; any
    /// failure along the way leaves history and memory untouched.
    pub async fn ask(
        &self,
        conversation_id: &ConversationId,
        request: AskRequest,
        api_key: Option<&str>,
    ) -> Result<TurnReply, ApiError> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(ApiError::BadRequest("Question must not be empty".to_string()));
        }
        let model = self.resolve_model(request.model.as_deref())?;

        let memory = self.store.memory(conversation_id).ok_or_else(|| {
            ApiError::NotFound(format!("Conversation {} not found", conversation_id))
        })?;

        let providers = self.providers.connect(api_key)?;
        let index = self.index.get_or_build(providers.embedder.as_ref()).await?;

        let standalone = self
            .condense_question(&providers, &model, &memory, question)
            .await?;

        let query_embedding = providers.embedder.embed(&standalone).await?;
        let hits = index
            .search(&query_embedding, self.rag.retrieval_top_k)
            .await?;

        let answer = self
            .answer_question(&providers, &model, &standalone, &hits)
            .await?;

        let sources = to_excerpts(&hits, self.rag.source_preview_chars);
        let reply = format_reply(&answer, &sources);

        let title = self
            .store
            .record_turn(conversation_id, question, &answer, &reply)
            .ok_or_else(|| {
                ApiError::NotFound(format!("Conversation {} not found", conversation_id))
            })?;

        info!(
            "💬 Answered turn in {} with {} ({} sources)",
            conversation_id,
            model,
            sources.len()
        );

        Ok(TurnReply {
            conversation_id: *conversation_id,
            title,
            model,
            answer,
            sources,
            reply,
        })
    }

    /// Rewrite a follow-up as a standalone question. First turns pass through.
    async fn condense_question(
        &self,
        providers: &Providers,
        model: &str,
        memory: &[Exchange],
        question: &str,
    ) -> Result<String, ApiError> {
        if memory.is_empty() {
            return Ok(question.to_string());
        }

        let prompt = self
            .prompts
            .condense_question_prompt
            .replace("{{HISTORY}}", &format_history(memory))
            .replace("{{QUESTION}}", question);

        let condensed = providers
            .llm
            .generate(model, &[ChatMessage::user(prompt)])
            .await?;

        let condensed = condensed.trim();
        debug!("Condensed follow-up into: {}", condensed);

        if condensed.is_empty() {
            Ok(question.to_string())
        } else {
            Ok(condensed.to_string())
        }
    }

    async fn answer_question(
        &self,
        providers: &Providers,
        model: &str,
        question: &str,
        hits: &[ScoredChunk],
    ) -> Result<String, ApiError> {
        let context = hits
            .iter()
            .map(|hit| hit.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let messages = [
            ChatMessage::system(self.prompts.answer_system_prompt.replace("{{CONTEXT}}", &context)),
            ChatMessage::user(question),
        ];

        providers.llm.generate(model, &messages).await
    }
}

fn format_history(memory: &[Exchange]) -> String {
    memory
        .iter()
        .map(|exchange| format!("Human: {}\nAssistant: {}", exchange.question, exchange.answer))
        .collect::<Vec<_>>()
        .join("\n")
}

fn to_excerpts(hits: &[ScoredChunk], preview_chars: usize) -> Vec<SourceExcerpt> {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| SourceExcerpt {
            index: i + 1,
            preview: hit.content.chars().take(preview_chars).collect(),
            similarity: hit.similarity,
        })
        .collect()
}

/// Answer followed by the numbered source excerpts.
pub fn format_reply(answer: &str, sources: &[SourceExcerpt]) -> String {
    let mut reply = format!("{}\n\n**🔍 Sources used for this answer:**\n", answer);
    for source in sources {
        reply.push_str(&format!("**Excerpt {}:** {}...\n", source.index, source.preview));
    }
    reply
}
