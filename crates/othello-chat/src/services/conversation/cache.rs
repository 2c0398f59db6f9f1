use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::types::{Conversation, Exchange};
use crate::models::chat::{ConversationId, ConversationSummary};

/// Thread-safe in-memory conversation store.
#[derive(Clone)]
pub struct ConversationStore {
    storage: Arc<DashMap<ConversationId, Conversation>>,
    next_seq: Arc<AtomicU64>,
    title_chars: usize,
}

impl ConversationStore {
    pub fn new(title_chars: usize) -> Self {
        info!("Initializing conversation store");
        Self {
            storage: Arc::new(DashMap::new()),
            next_seq: Arc::new(AtomicU64::new(0)),
            title_chars,
        }
    }

    /// Create an empty conversation titled `Discussion N`.
    pub fn create(&self) -> Conversation {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let title = format!("Discussion {}", self.storage.len() + 1);
        let conversation = Conversation::new(title, seq);

        self.storage.insert(conversation.id, conversation.clone());
        debug!("Created conversation {}", conversation.id);
        conversation
    }

    pub fn get(&self, id: &ConversationId) -> Option<Conversation> {
        self.storage.get(id).map(|entry| entry.value().clone())
    }

    /// Snapshot of the memory buffer, taken before a turn's external calls.
    pub fn memory(&self, id: &ConversationId) -> Option<Vec<Exchange>> {
        self.storage.get(id).map(|entry| entry.memory.clone())
    }

    /// Apply an answered turn in one critical section; returns the new title.
    pub fn record_turn(
        &self,
        id: &ConversationId,
        question: &str,
        answer: &str,
        reply: &str,
    ) -> Option<String> {
        let mut entry = self.storage.get_mut(id)?;
        entry.record_turn(question, answer, reply, self.title_chars);
        debug!("Conversation {} now has {} turns", id, entry.turn_count());
        Some(entry.title.clone())
    }

    /// Conversations in creation order.
    pub fn list(&self) -> Vec<ConversationSummary> {
        let mut items: Vec<(u64, ConversationSummary)> = self
            .storage
            .iter()
            .map(|entry| (entry.seq, entry.summary()))
            .collect();
        items.sort_by_key(|(seq, _)| *seq);
        items.into_iter().map(|(_, summary)| summary).collect()
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(30)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_store_basic_operations() {
        let store = ConversationStore::default();
        assert!(store.is_empty());

        let first = store.create();
        let second = store.create();
        assert_eq!(first.title, "Discussion 1");
        assert_eq!(second.title, "Discussion 2");
        assert_eq!(store.len(), 2);

        let listed: Vec<_> = store.list().into_iter().map(|s| s.id).collect();
        assert_eq!(listed, vec![first.id, second.id]);
    }

    #[test]
    fn test_record_turn_updates_stored_conversation() {
        let store = ConversationStore::new(5);
        let conversation = store.create();

        let title = store
            .record_turn(&conversation.id, "Who is Cassio?", "A lieutenant.", "A lieutenant.\n\nsources")
            .unwrap();
        assert_eq!(title, "Who i...");

        let stored = store.get(&conversation.id).unwrap();
        assert_eq!(stored.messages.len(), 2);
        assert_eq!(store.memory(&conversation.id).unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_conversation() {
        let store = ConversationStore::default();
        let id = Uuid::new_v4();
        assert!(store.get(&id).is_none());
        assert!(store.memory(&id).is_none());
        assert!(store.record_turn(&id, "q", "a", "a").is_none());
    }
}
