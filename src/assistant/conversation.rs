//! Per-conversation message history

use crate::llm::provider::{Message, MessageRole};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

pub const DEFAULT_HISTORY_MESSAGES: usize = 20;
const DEFAULT_MAX_CONVERSATIONS: usize = 1000;

#[derive(Debug)]
struct Conversation {
    messages: VecDeque<Message>,
    last_update: u64,
}

#[derive(Debug, Default)]
struct Inner {
    conversations: HashMap<String, Conversation>,
    clock: u64,
}

/// Bounded history keyed by conversation id.
///
/// Only user questions and final assistant answers are kept; tool traffic
/// stays inside a single question. Each conversation holds at most
/// `max_messages` messages, and the least recently updated conversation is
/// evicted once `max_conversations` is exceeded.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    inner: Arc<Mutex<Inner>>,
    max_messages: usize,
    max_conversations: usize,
}

impl ConversationStore {
    pub fn new(max_messages: usize) -> Self {
        Self::with_limits(max_messages, DEFAULT_MAX_CONVERSATIONS)
    }

    pub fn with_limits(max_messages: usize, max_conversations: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            max_messages,
            max_conversations: max_conversations.max(1),
        }
    }

    /// History of `conversation_id`, oldest first
    pub async fn history(&self, conversation_id: &str) -> Vec<Message> {
        self.inner
            .lock()
            .await
            .conversations
            .get(conversation_id)
            .map(|conversation| conversation.messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Append a question and its answer
    pub async fn record_exchange(&self, conversation_id: &str, question: &str, answer: &str) {
        if self.max_messages == 0 {
            return;
        }

        let mut inner = self.inner.lock().await;
        inner.clock += 1;
        let tick = inner.clock;
        let conversations = &mut inner.conversations;
        let conversation = conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| Conversation {
                messages: VecDeque::new(),
                last_update: tick,
            });

        conversation.messages.push_back(Message::user(question));
        conversation.messages.push_back(Message::assistant(answer));
        while conversation.messages.len() > self.max_messages {
            conversation.messages.pop_front();
        }
        // never start a history with a dangling answer
        while conversation
            .messages
            .front()
            .is_some_and(|message| message.role != MessageRole::User)
        {
            conversation.messages.pop_front();
        }
        conversation.last_update = tick;

        if conversations.len() > self.max_conversations {
            let oldest = conversations
                .iter()
                .min_by_key(|(_, conversation)| conversation.last_update)
                .map(|(id, _)| id.clone());
            if let Some(id) = oldest {
                conversations.remove(&id);
            }
        }
    }

    pub async fn clear(&self, conversation_id: &str) -> bool {
        self.inner
            .lock()
            .await
            .conversations
            .remove(conversation_id)
            .is_some()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.conversations.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.conversations.is_empty()
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_MESSAGES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_history_is_bounded() {
        let store = ConversationStore::new(4);
        for i in 0..5 {
            store
                .record_exchange("c1", &format!("question {i}"), &format!("answer {i}"))
                .await;
        }

        let history = store.history("c1").await;
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].content, "question 3");
        assert_eq!(history[0].role, MessageRole::User);
        assert_eq!(history[3].content, "answer 4");
    }

    #[tokio::test]
    async fn test_odd_limit_never_starts_with_answer() {
        let store = ConversationStore::new(3);
        store.record_exchange("c1", "q1", "a1").await;
        store.record_exchange("c1", "q2", "a2").await;

        let history = store.history("c1").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "q2");
    }

    #[tokio::test]
    async fn test_conversations_are_isolated_and_evicted() {
        let store = ConversationStore::with_limits(20, 2);
        store.record_exchange("a", "qa", "ra").await;
        store.record_exchange("b", "qb", "rb").await;
        store.record_exchange("c", "qc", "rc").await;

        assert_eq!(store.len().await, 2);
        assert!(store.history("a").await.is_empty());
        assert_eq!(store.history("c").await[0].content, "qc");

        assert!(store.clear("c").await);
        assert!(!store.clear("c").await);
    }

    #[tokio::test]
    async fn test_zero_limit_keeps_nothing() {
        let store = ConversationStore::new(0);
        store.record_exchange("c1", "q", "a").await;
        assert!(store.is_empty().await);
    }
}
