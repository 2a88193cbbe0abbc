use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Mutex, MutexGuard};

use crate::common::{ChatId, MemberId, MessageId, RouterError};
use crate::domains::chatrooms::models::{Chat, Member, Message, NewChat, NewMessage};
use crate::kernel::BaseChatStore;

#[derive(Default)]
struct State {
    members: Vec<Member>,
    chats: Vec<Chat>,
    messages: Vec<Message>,
}

impl State {
    fn member_exists(&self, member_id: &MemberId) -> bool {
        self.members.iter().any(|m| &m.id == member_id)
    }

    fn chat_mut(&mut self, chat_id: ChatId) -> Result<&mut Chat> {
        self.chats
            .iter_mut()
            .find(|c| c.id == chat_id)
            .ok_or_else(|| RouterError::ChatNotFound(chat_id).into())
    }
}

/// Process-local chat store, used by tests and when no database is configured.
///
/// Starts with the human member provisioned.
pub struct InMemoryChatStore {
    state: Mutex<State>,
}

impl InMemoryChatStore {
    pub fn new(human_member_id: &MemberId) -> Self {
        let state = State {
            members: vec![Member::human(human_member_id.clone(), "User")],
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    /// Provision members up front.
    pub fn with_members(self, members: impl IntoIterator<Item = Member>) -> Self {
        {
            let mut state = self.state();
            for member in members {
                if !state.member_exists(&member.id) {
                    state.members.push(member);
                }
            }
        }
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl BaseChatStore for InMemoryChatStore {
    async fn get_all_members(&self) -> Result<Vec<Member>> {
        Ok(self.state().members.clone())
    }

    async fn find_member(&self, member_id: &MemberId) -> Result<Option<Member>> {
        Ok(self
            .state()
            .members
            .iter()
            .find(|m| &m.id == member_id)
            .cloned())
    }

    async fn upsert_member(&self, member: &Member) -> Result<()> {
        let mut state = self.state();
        match state.members.iter_mut().find(|m| m.id == member.id) {
            Some(existing) => *existing = member.clone(),
            None => state.members.push(member.clone()),
        }
        Ok(())
    }

    async fn get_all_chats(&self) -> Result<Vec<Chat>> {
        Ok(self.state().chats.clone())
    }

    async fn find_chat(&self, chat_id: ChatId) -> Result<Option<Chat>> {
        Ok(self
            .state()
            .chats
            .iter()
            .find(|c| c.id == chat_id)
            .cloned())
    }

    async fn get_chats_for_member(&self, member_id: &MemberId) -> Result<Vec<Chat>> {
        Ok(self
            .state()
            .chats
            .iter()
            .filter(|c| c.has_member(member_id))
            .cloned()
            .collect())
    }

    async fn create_chat(&self, chat: NewChat) -> Result<Chat> {
        let mut state = self.state();
        if let Some(missing) = chat.member_ids.iter().find(|id| !state.member_exists(id)) {
            return Err(RouterError::MemberNotFound(missing.clone()).into());
        }

        let mut member_ids: Vec<MemberId> = Vec::with_capacity(chat.member_ids.len());
        for id in chat.member_ids {
            if !member_ids.contains(&id) {
                member_ids.push(id);
            }
        }

        let created = Chat {
            id: ChatId::new(),
            name: chat.name,
            topic: chat.topic,
            member_ids,
            created_at: Utc::now(),
        };
        state.chats.push(created.clone());
        Ok(created)
    }

    async fn add_chat_member(&self, chat_id: ChatId, member_id: &MemberId) -> Result<()> {
        let mut state = self.state();
        if !state.member_exists(member_id) {
            return Err(RouterError::MemberNotFound(member_id.clone()).into());
        }
        let chat = state.chat_mut(chat_id)?;
        if !chat.has_member(member_id) {
            chat.member_ids.push(member_id.clone());
        }
        Ok(())
    }

    async fn remove_chat_member(&self, chat_id: ChatId, member_id: &MemberId) -> Result<()> {
        let mut state = self.state();
        let chat = state.chat_mut(chat_id)?;
        chat.member_ids.retain(|m| m != member_id);
        Ok(())
    }

    async fn get_conversation_history(&self, chat_id: ChatId) -> Result<Vec<Message>> {
        let state = self.state();
        if !state.chats.iter().any(|c| c.id == chat_id) {
            return Err(RouterError::ChatNotFound(chat_id).into());
        }
        Ok(state
            .messages
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect())
    }

    async fn create_message(&self, message: NewMessage) -> Result<Message> {
        let mut state = self.state();
        state.chat_mut(message.chat_id)?;

        let kind = message.kind();
        let created = Message {
            id: MessageId::new(),
            chat_id: message.chat_id,
            sender_id: message.sender_id,
            kind,
            content: message.content,
            created_at: Utc::now(),
        };
        state.messages.push(created.clone());
        Ok(created)
    }
}
