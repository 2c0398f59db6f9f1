//! Retrieval-augmented chatbot answering questions about *Othello*.
//!
//! Two binaries share this library: `othello-chat` talks to the hosted
//! Mistral API with a per-user key, `othello-chat-local` to a locally
//! hosted OpenAI-compatible server.

pub mod app;
pub mod config;
pub mod document;
pub mod handlers;
pub mod models;
pub mod services;
pub mod state;
pub mod utils;

pub use app::{build_router, build_state, prepare_index, run};
pub use services::ProviderKind;
