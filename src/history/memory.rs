use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::history::ConversationStore;
use crate::models::chat::{ new_conversation_id, ChatMessage, Conversation, ConversationId };

/// Process-lifetime store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryConversationStore {
    conversations: RwLock<HashMap<ConversationId, Vec<ChatMessage>>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn create(&self) -> ConversationId {
        let mut conversations = self.conversations.write().await;
        let mut id = new_conversation_id();
        while conversations.contains_key(&id) {
            id = new_conversation_id();
        }
        conversations.insert(id.clone(), Vec::new());
        debug!("Created conversation {}", id);
        id
    }

    async fn get(&self, conversation_id: &str) -> Conversation {
        let conversations = self.conversations.read().await;
        Conversation {
            id: conversation_id.to_string(),
            messages: conversations.get(conversation_id).cloned().unwrap_or_default(),
        }
    }

    async fn append(&self, conversation_id: &str, message: ChatMessage) {
        let mut conversations = self.conversations.write().await;
        debug!("Appending {} message to conversation {}", message.role, conversation_id);
        conversations.entry(conversation_id.to_string()).or_default().push(message);
    }

    async fn delete(&self, conversation_id: &str) {
        let removed = self.conversations.write().await.remove(conversation_id);
        debug!("Deleted conversation {} (existed: {})", conversation_id, removed.is_some());
    }

    async fn len(&self) -> usize {
        self.conversations.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::Role;
    use std::sync::Arc;

    #[tokio::test]
    async fn create_yields_distinct_empty_conversations() {
        let store = MemoryConversationStore::new();
        let a = store.create().await;
        let b = store.create().await;
        assert_ne!(a, b);
        assert!(store.get(&a).await.messages.is_empty());
        assert!(store.get(&b).await.messages.is_empty());
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn unknown_ids_read_empty_and_append_lazily() {
        let store = MemoryConversationStore::new();
        let conv = store.get("nope").await;
        assert_eq!(conv.id, "nope");
        assert!(conv.messages.is_empty());
        assert_eq!(store.len().await, 0);

        store.append("nope", ChatMessage::user("hi")).await;
        store.append("nope", ChatMessage::assistant("hello")).await;
        let roles: Vec<Role> = store
            .get("nope").await
            .messages.iter()
            .map(|m| m.role)
            .collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryConversationStore::new();
        let id = store.create().await;
        store.append(&id, ChatMessage::user("x")).await;
        store.delete(&id).await;
        store.delete(&id).await;
        store.delete("never-existed").await;
        assert!(store.get(&id).await.messages.is_empty());
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn concurrent_appends_are_not_lost() {
        let store = Arc::new(MemoryConversationStore::new());
        let mut handles = Vec::new();
        for i in 0..50 {
            let store = store.clone();
            handles.push(
                tokio::spawn(async move {
                    store.append("shared", ChatMessage::user(i.to_string())).await;
                })
            );
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.get("shared").await.messages.len(), 50);
    }
}
