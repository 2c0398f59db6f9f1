use axum::extract::FromRef;
use std::sync::Arc;

use crate::services::{ChatService, IndexManager, ProviderFactory};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub chat_service: Arc<ChatService>,
    pub index_manager: Arc<IndexManager>,
    pub providers: Arc<dyn ProviderFactory>,
}

impl FromRef<AppState> for Arc<ChatService> {
    fn from_ref(state: &AppState) -> Self {
        state.chat_service.clone()
    }
}

impl FromRef<AppState> for Arc<IndexManager> {
    fn from_ref(state: &AppState) -> Self {
        state.index_manager.clone()
    }
}
