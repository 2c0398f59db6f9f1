pub mod chat;
pub mod conversation;
pub mod embedding_service;
pub mod index;
pub mod llm_service;
pub mod mistral;
pub mod provider;

pub use chat::ChatService;
pub use conversation::ConversationStore;
pub use index::{IndexManager, IndexStatus, VectorIndex};
pub use provider::{
    EmbeddingProvider, LlmProvider, LocalProviders, MistralProviders, ProviderFactory, ProviderKind,
    Providers,
};
