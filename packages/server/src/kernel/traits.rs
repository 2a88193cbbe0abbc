// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no routing logic.
// The routing core (chat service, orchestrator) is written against these.
//
// Naming convention: Base* for trait names (e.g., BaseChatStore, BaseReplyAgent)

use anyhow::Result;
use async_trait::async_trait;

use crate::common::{ChatId, MemberId};
use crate::domains::chatrooms::models::{Chat, Member, Message, MessageContent, NewChat, NewMessage};

// =============================================================================
// Storage Trait (Infrastructure - chats, members, messages)
// =============================================================================

#[async_trait]
pub trait BaseChatStore: Send + Sync {
    async fn get_all_members(&self) -> Result<Vec<Member>>;

    async fn find_member(&self, member_id: &MemberId) -> Result<Option<Member>>;

    /// Insert a member, or refresh its name, kind and description.
    async fn upsert_member(&self, member: &Member) -> Result<()>;

    /// All chats with their membership sets.
    async fn get_all_chats(&self) -> Result<Vec<Chat>>;

    async fn find_chat(&self, chat_id: ChatId) -> Result<Option<Chat>>;

    /// Chats the member currently belongs to.
    async fn get_chats_for_member(&self, member_id: &MemberId) -> Result<Vec<Chat>>;

    async fn create_chat(&self, chat: NewChat) -> Result<Chat>;

    /// Add a member to a chat. Adding an existing member is a no-op.
    async fn add_chat_member(&self, chat_id: ChatId, member_id: &MemberId) -> Result<()>;

    async fn remove_chat_member(&self, chat_id: ChatId, member_id: &MemberId) -> Result<()>;

    /// Messages of a chat, oldest first.
    async fn get_conversation_history(&self, chat_id: ChatId) -> Result<Vec<Message>>;

    async fn create_message(&self, message: NewMessage) -> Result<Message>;
}

// =============================================================================
// Reply Agent Trait (Infrastructure - per-agent generation capability)
// =============================================================================

#[async_trait]
pub trait BaseReplyAgent: Send + Sync {
    /// Produce this agent's next turn for a chat.
    ///
    /// `Ok(None)` means the agent chose not to speak.
    async fn reply(&self, chat_id: ChatId) -> Result<Option<MessageContent>>;
}

// =============================================================================
// Transport Trait (Infrastructure - live client notifications)
// =============================================================================

#[async_trait]
pub trait BaseTransport: Send + Sync {
    /// A message was persisted and handed to the broker.
    async fn message_published(&self, message: &Message);

    /// An agent started or stopped composing a reply.
    async fn typing(&self, chat_id: ChatId, member_id: &MemberId, is_typing: bool);

    /// Global pause state changed.
    async fn pause_status(&self, is_paused: bool, is_auto_pause: bool);
}
