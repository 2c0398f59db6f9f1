//! In-memory conversations: message history plus the memory buffer that
//! conditions follow-up retrieval. Nothing here outlives the process.

mod cache;
pub mod types;

pub use cache::ConversationStore;
pub use types::{Conversation, Exchange};
