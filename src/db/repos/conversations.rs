use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{Conversation, CreateConversation, CreateMessage, Message},
};

/// The generation session store.
#[async_trait]
pub trait ConversationRepo: Send + Sync {
    async fn create(&self, input: CreateConversation) -> DbResult<Conversation>;
    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<Conversation>>;

    /// Append a message and bump the conversation's `updated_at`.
    async fn append_message(&self, input: CreateMessage) -> DbResult<Message>;

    /// Messages in insertion order.
    async fn list_messages(&self, conversation_id: Uuid) -> DbResult<Vec<Message>>;
}
