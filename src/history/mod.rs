mod memory;

use async_trait::async_trait;
use log::info;
use std::error::Error;
use std::sync::Arc;

use crate::cli::Args;
use crate::models::chat::{ ChatMessage, Conversation, ConversationId };

pub use memory::MemoryConversationStore;

/// Keyed registry of conversation histories.
///
/// Unknown ids are never an error: `get` yields an empty conversation and
/// `append` creates the entry. Each call is atomic with respect to other calls
/// on the same store, but nothing serializes a whole exchange, so concurrent
/// exchanges on one id may interleave their appends.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create(&self) -> ConversationId;

    async fn get(&self, conversation_id: &str) -> Conversation;

    async fn append(&self, conversation_id: &str, message: ChatMessage);

    async fn delete(&self, conversation_id: &str);

    async fn len(&self) -> usize;
}

pub fn create_history_store(
    args: &Args
) -> Result<Arc<dyn ConversationStore>, Box<dyn Error + Send + Sync>> {
    match args.history_type.to_lowercase().as_str() {
        "memory" => Ok(Arc::new(MemoryConversationStore::new())),
        _ =>
            Err(
                Box::new(
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("Unsupported history store type: {}", args.history_type)
                    )
                )
            ),
    }
}

pub fn initialize_history_store(
    args: &Args
) -> Result<Arc<dyn ConversationStore>, Box<dyn Error + Send + Sync>> {
    info!("Chat history will be kept in: {}", args.history_type);
    create_history_store(args)
}

/// Builds the upstream prompt: the system preamble, then the most recent
/// `limit` history messages (all of them when `limit` is 0).
pub fn build_prompt(
    system_prompt: &str,
    history: &[ChatMessage],
    limit: usize
) -> Vec<ChatMessage> {
    let start = if limit > 0 && history.len() > limit { history.len() - limit } else { 0 };
    let mut messages = Vec::with_capacity(history.len() - start + 1);
    if !system_prompt.is_empty() {
        messages.push(ChatMessage::system(system_prompt));
    }
    messages.extend(history[start..].iter().cloned());
    messages
}
