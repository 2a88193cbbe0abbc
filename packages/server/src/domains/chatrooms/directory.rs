//! Chat directory - in-memory map of chat id to member ids.
//!
//! Rebuilt from storage at startup and updated when chats are created or
//! members join. Entries only grow: a member removed from a chat stays listed
//! until the next rebuild, so the directory is a superset of the last observed
//! membership.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::{ChatId, MemberId};
use crate::domains::chatrooms::models::Chat;

#[derive(Default)]
pub struct ChatDirectory {
    chats: RwLock<HashMap<ChatId, Vec<MemberId>>>,
}

impl ChatDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ChatId, Vec<MemberId>>> {
        self.chats.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ChatId, Vec<MemberId>>> {
        self.chats.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the whole directory with the given chats.
    pub fn load(&self, chats: &[Chat]) {
        let mut map = self.write();
        map.clear();
        for chat in chats {
            map.insert(chat.id, dedup(chat.member_ids.iter().cloned()));
        }
    }

    /// Union `member_ids` into a chat's entry, creating it if absent.
    pub fn update(&self, chat_id: ChatId, member_ids: &[MemberId]) {
        let mut map = self.write();
        let entry = map.entry(chat_id).or_default();
        for id in member_ids {
            if !entry.contains(id) {
                entry.push(id.clone());
            }
        }
    }

    /// Members known for a chat, empty when the chat is unknown.
    pub fn members_of(&self, chat_id: ChatId) -> Vec<MemberId> {
        self.read().get(&chat_id).cloned().unwrap_or_default()
    }

    /// Chats a member is listed in.
    pub fn chats_for(&self, member_id: &MemberId) -> Vec<ChatId> {
        let mut chats: Vec<ChatId> = self
            .read()
            .iter()
            .filter(|(_, members)| members.contains(member_id))
            .map(|(chat_id, _)| *chat_id)
            .collect();
        chats.sort();
        chats
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

fn dedup(ids: impl Iterator<Item = MemberId>) -> Vec<MemberId> {
    let mut out = Vec::new();
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}
