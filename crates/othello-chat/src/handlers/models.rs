use axum::{extract::State, Json};
use std::sync::Arc;

use crate::models::chat::ModelsResponse;
use crate::services::{IndexManager, IndexStatus};
use crate::state::AppState;

/// Selectable models with their comparison blurbs.
pub async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        provider: state.providers.kind().to_string(),
        requires_api_key: state.providers.requires_api_key(),
        models: state.chat_service.models().to_vec(),
    })
}

pub async fn index_status(State(index): State<Arc<IndexManager>>) -> Json<IndexStatus> {
    Json(index.status())
}
