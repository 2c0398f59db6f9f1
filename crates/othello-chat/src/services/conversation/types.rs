use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::chat::{ChatMessage, ConversationId, ConversationSummary};

/// One answered question, as replayed to the model on follow-ups.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,

    /// Rendered history, two entries per answered turn
    pub messages: Vec<ChatMessage>,

    /// Memory buffer, one exchange per answered turn
    pub memory: Vec<Exchange>,

    pub created_at: DateTime<Utc>,

    /// Creation order, used to list conversations in the sidebar
    pub(super) seq: u64,
}

impl Conversation {
    pub fn new(title: String, seq: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            title,
            messages: Vec::new(),
            memory: Vec::new(),
            created_at: Utc::now(),
            seq,
        }
    }

    /// Append one answered turn. `reply` is what the user sees (answer plus
    /// sources), `answer` is what goes into the memory buffer.
    pub fn record_turn(&mut self, question: &str, answer: &str, reply: &str, title_chars: usize) {
        self.messages.push(ChatMessage::user(question));
        self.messages.push(ChatMessage::assistant(reply));
        self.memory.push(Exchange {
            question: question.to_string(),
            answer: answer.to_string(),
        });

        if self.messages.len() == 2 {
            let prefix: String = question.chars().take(title_chars).collect();
            self.title = format!("{}...", prefix);
        }
    }

    pub fn turn_count(&self) -> usize {
        self.memory.len()
    }

    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id,
            title: self.title.clone(),
            created_at: self.created_at,
        }
    }
}
