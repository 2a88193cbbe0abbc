//! Chat management on top of storage and the topic broker.
//!
//! Every membership change is mirrored three ways: the store (source of
//! truth), the broker topology (one queue per member per chat) and the chat
//! directory (in-memory lookup for the orchestrator).

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::common::{ChatId, MemberId, RouterError};
use crate::domains::chatrooms::directory::ChatDirectory;
use crate::domains::chatrooms::models::{
    Chat, Member, Message, MessageContent, NewChat, NewMessage,
};
use crate::kernel::{ControlNotification, ServerDeps};

pub struct ChatService {
    deps: ServerDeps,
    directory: Arc<ChatDirectory>,
}

impl ChatService {
    pub fn new(deps: ServerDeps) -> Self {
        Self {
            deps,
            directory: Arc::new(ChatDirectory::new()),
        }
    }

    pub fn deps(&self) -> &ServerDeps {
        &self.deps
    }

    pub fn directory(&self) -> &Arc<ChatDirectory> {
        &self.directory
    }

    pub fn human_member_id(&self) -> &MemberId {
        &self.deps.human_member_id
    }

    // =========================================================================
    // Startup
    // =========================================================================

    /// Insert or refresh members in storage.
    pub async fn provision_members(&self, members: &[Member]) -> Result<()> {
        for member in members {
            self.deps.store.upsert_member(member).await?;
        }
        Ok(())
    }

    /// Declare the control topic and one control queue per known member.
    pub async fn ensure_control_queues(&self) -> Result<()> {
        self.deps.broker.ensure_control_exchange().await?;
        let members = self.deps.store.get_all_members().await?;
        for member in &members {
            self.deps.broker.ensure_control_queue(&member.id).await?;
        }
        info!(members = members.len(), "control queues ready");
        Ok(())
    }

    /// Rebuild the chat directory from storage.
    pub async fn load_directory(&self) -> Result<()> {
        let chats = self.deps.store.get_all_chats().await?;
        self.directory.load(&chats);
        info!(chats = chats.len(), "chat directory loaded");
        Ok(())
    }

    // =========================================================================
    // Messages
    // =========================================================================

    /// Persist a message and fan it out to the chat's members.
    ///
    /// A message without a sender is a system message.
    pub async fn publish_message(
        &self,
        chat_id: ChatId,
        content: MessageContent,
        sender_id: Option<&MemberId>,
    ) -> Result<Message> {
        if let Some(sender) = sender_id {
            if self.deps.store.find_member(sender).await?.is_none() {
                return Err(RouterError::MemberNotFound(sender.clone()).into());
            }
        }

        let message = self
            .deps
            .store
            .create_message(NewMessage {
                chat_id,
                sender_id: sender_id.cloned(),
                content,
            })
            .await?;

        self.deps.broker.publish(&message).await?;
        self.deps.transport.message_published(&message).await;

        debug!(
            chat_id = %chat_id,
            message_id = %message.id,
            sender_id = ?message.sender_id,
            "message published"
        );
        Ok(message)
    }

    pub async fn history(&self, chat_id: ChatId) -> Result<Vec<Message>> {
        self.deps.store.get_conversation_history(chat_id).await
    }

    // =========================================================================
    // Chats and members
    // =========================================================================

    /// Create a chat. The human member is always added.
    ///
    /// With a topic the context message is published so members start
    /// discussing it; without one it is only stored.
    pub async fn create_chat(
        &self,
        member_ids: Vec<MemberId>,
        name: Option<String>,
        topic: Option<String>,
    ) -> Result<Chat> {
        let mut all_members: Vec<MemberId> = Vec::with_capacity(member_ids.len() + 1);
        for id in member_ids
            .into_iter()
            .chain(std::iter::once(self.deps.human_member_id.clone()))
        {
            if !all_members.contains(&id) {
                all_members.push(id);
            }
        }

        let chat = self
            .deps
            .store
            .create_chat(NewChat {
                name,
                topic: topic.clone(),
                member_ids: all_members.clone(),
            })
            .await?;

        self.deps.broker.ensure_chat_topic(chat.id).await?;
        for member_id in &all_members {
            self.deps
                .broker
                .ensure_member_subscription(chat.id, member_id)
                .await?;
        }

        let context = self.context_text(&all_members, topic.as_deref()).await?;
        if topic.is_some() {
            self.publish_message(chat.id, MessageContent::text(context), None)
                .await?;
        } else {
            self.deps
                .store
                .create_message(NewMessage {
                    chat_id: chat.id,
                    sender_id: None,
                    content: MessageContent::text(context),
                })
                .await?;
        }

        for member_id in &all_members {
            self.deps.broker.ensure_control_queue(member_id).await?;
            self.deps
                .broker
                .publish_control(member_id, &ControlNotification::NewChat { chat_id: chat.id })
                .await?;
        }

        self.directory.update(chat.id, &all_members);

        info!(chat_id = %chat.id, members = ?all_members, "chat created");
        Ok(chat)
    }

    /// Add a member to an existing chat and announce it.
    pub async fn add_member(&self, chat_id: ChatId, member_id: &MemberId) -> Result<()> {
        self.deps.store.add_chat_member(chat_id, member_id).await?;

        self.deps
            .broker
            .ensure_member_subscription(chat_id, member_id)
            .await?;
        self.deps.broker.ensure_control_queue(member_id).await?;
        self.deps
            .broker
            .publish_control(member_id, &ControlNotification::NewChat { chat_id })
            .await?;

        self.publish_message(
            chat_id,
            MessageContent::text(format!("{} has joined the conversation.", member_id)),
            None,
        )
        .await?;

        self.directory.update(chat_id, std::slice::from_ref(member_id));

        info!(chat_id = %chat_id, member_id = %member_id, "member added");
        Ok(())
    }

    /// Remove a member from a chat and delete its queue.
    pub async fn remove_member(&self, chat_id: ChatId, member_id: &MemberId) -> Result<()> {
        self.deps.store.remove_chat_member(chat_id, member_id).await?;
        self.deps
            .broker
            .remove_member_subscription(chat_id, member_id)
            .await?;

        self.publish_message(
            chat_id,
            MessageContent::text(format!("{} has left the conversation.", member_id)),
            None,
        )
        .await?;

        info!(chat_id = %chat_id, member_id = %member_id, "member removed");
        Ok(())
    }

    pub async fn members(&self) -> Result<Vec<Member>> {
        self.deps.store.get_all_members().await
    }

    pub async fn chats(&self) -> Result<Vec<Chat>> {
        self.deps.store.get_all_chats().await
    }

    pub async fn chat(&self, chat_id: ChatId) -> Result<Chat> {
        self.deps
            .store
            .find_chat(chat_id)
            .await?
            .ok_or_else(|| RouterError::ChatNotFound(chat_id).into())
    }

    async fn context_text(&self, member_ids: &[MemberId], topic: Option<&str>) -> Result<String> {
        let members = self.deps.store.get_all_members().await?;
        let lines: Vec<String> = member_ids
            .iter()
            .filter_map(|id| members.iter().find(|m| &m.id == id))
            .map(|m| match &m.description {
                Some(description) => format!("{}: {}", m.name, description),
                None => m.name.clone(),
            })
            .collect();

        let mut context = format!(
            "Conversation created with the following members:\n{}\n",
            lines.join("\n")
        );
        if let Some(topic) = topic {
            context.push_str(&format!(
                "Here is the topic for the present discussion: {}.\n",
                topic
            ));
        }
        Ok(context)
    }
}
