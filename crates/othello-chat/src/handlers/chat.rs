use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;
use tracing::info;

use crate::models::chat::{
    AskRequest, ConversationDetail, ConversationId, ConversationSummary, TurnReply,
};
use crate::services::ChatService;
use crate::utils::error::ApiError;

pub const API_KEY_HEADER: &str = "x-api-key";

pub async fn list_conversations(
    State(chat): State<Arc<ChatService>>,
) -> Json<Vec<ConversationSummary>> {
    Json(chat.store().list())
}

pub async fn create_conversation(
    State(chat): State<Arc<ChatService>>,
) -> (StatusCode, Json<ConversationSummary>) {
    let conversation = chat.store().create();
    info!("New conversation {} ({})", conversation.id, conversation.title);
    (StatusCode::CREATED, Json(conversation.summary()))
}

pub async fn get_conversation(
    State(chat): State<Arc<ChatService>>,
    Path(id): Path<ConversationId>,
) -> Result<Json<ConversationDetail>, ApiError> {
    let conversation = chat
        .store()
        .get(&id)
        .ok_or_else(|| ApiError::NotFound(format!("Conversation {} not found", id)))?;

    Ok(Json(ConversationDetail {
        id: conversation.id,
        title: conversation.title,
        messages: conversation.messages,
    }))
}

pub async fn ask_handler(
    State(chat): State<Arc<ChatService>>,
    Path(id): Path<ConversationId>,
    headers: HeaderMap,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<TurnReply>, ApiError> {
    let Json(request) = payload?;
    info!("Question in conversation {}: {}", id, request.question);

    let api_key = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    let reply = chat.ask(&id, request, api_key).await?;
    Ok(Json(reply))
}
