use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::{ModelTier, Settings};
use crate::handlers;
use crate::services::{
    ChatService, ConversationStore, IndexManager, LocalProviders, MistralProviders,
    ProviderFactory, ProviderKind,
};
use crate::state::AppState;

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,othello_chat=debug")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .init();
}

/// Wire services for one provider variant.
pub fn build_state(settings: Settings, kind: ProviderKind) -> AppState {
    let (providers, index_dir, models): (Arc<dyn ProviderFactory>, PathBuf, Vec<ModelTier>) =
        match kind {
            ProviderKind::Mistral => (
                Arc::new(MistralProviders::new(settings.mistral.clone())),
                settings.mistral.index_dir.clone(),
                settings.mistral.models.clone(),
            ),
            ProviderKind::Local => (
                Arc::new(LocalProviders::new(settings.local.clone())),
                settings.local.index_dir.clone(),
                settings.local.models.clone(),
            ),
        };

    let index_manager = Arc::new(IndexManager::new(&settings.rag, index_dir));

    let chat_service = Arc::new(ChatService::new(
        ConversationStore::new(settings.rag.title_chars),
        index_manager.clone(),
        providers.clone(),
        settings.rag.clone(),
        settings.prompts.clone(),
        models,
    ));

    AppState {
        chat_service,
        index_manager,
        providers,
    }
}

/// Adopt an index finished by an earlier run so readiness reports it before
/// the first question. The local server needs no credential, so without one
/// it starts building in the background.
pub async fn prepare_index(state: &AppState, kind: ProviderKind) -> Result<()> {
    match state.index_manager.load_persisted().await {
        Ok(true) => return Ok(()),
        Ok(false) => info!("No finished index yet"),
        Err(e) => error!("Cannot read persisted index: {}", e),
    }

    if kind == ProviderKind::Local {
        let providers = state.providers.connect(None)?;
        let index_manager = state.index_manager.clone();
        tokio::spawn(async move {
            if let Err(e) = index_manager.get_or_build(providers.embedder.as_ref()).await {
                error!("Index build failed: {}", e);
            }
        });
    }

    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/api/models", get(handlers::models::list_models))
        .route("/api/index/status", get(handlers::models::index_status))
        .route(
            "/api/conversations",
            get(handlers::chat::list_conversations).post(handlers::chat::create_conversation),
        )
        .route("/api/conversations/{id}", get(handlers::chat::get_conversation))
        .route(
            "/api/conversations/{id}/messages",
            post(handlers::chat::ask_handler),
        );

    Router::new()
        .route("/", get(handlers::page::index_page))
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check))
        .merge(api_routes)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false)),
        )
}

/// Start the chatbot server for the given provider variant.
pub async fn run(kind: ProviderKind) -> Result<()> {
    init_tracing();
    info!("🚀 Starting Othello chatbot ({})", kind);

    let settings = Settings::load()?;
    info!("✅ Configuration loaded");

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    let state = build_state(settings, kind);
    prepare_index(&state, kind).await?;

    let app = build_router(state);

    info!("🎯 Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
}
