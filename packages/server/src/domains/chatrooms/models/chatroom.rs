use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::{ChatId, MemberId, MessageId};

/// Chat - a multi-party conversation with a membership set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: ChatId,
    pub name: Option<String>,
    pub topic: Option<String>,
    pub member_ids: Vec<MemberId>,
    pub created_at: DateTime<Utc>,
}

impl Chat {
    pub fn has_member(&self, member_id: &MemberId) -> bool {
        self.member_ids.contains(member_id)
    }
}

/// Input for creating a chat.
#[derive(Debug, Clone, Default)]
pub struct NewChat {
    pub name: Option<String>,
    pub topic: Option<String>,
    pub member_ids: Vec<MemberId>,
}

/// Message - an immutable chat entry, also the broker envelope.
///
/// Field names match the JSON records exchanged with the rest of the
/// deployment (`chatId`, `senderId`, `type`, `createdAt`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    /// Absent for system-originated messages (join/leave notices, context).
    #[serde(default)]
    pub sender_id: Option<MemberId>,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: MessageContent,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Whether `member_id` authored this message.
    pub fn is_from(&self, member_id: &MemberId) -> bool {
        self.sender_id.as_ref() == Some(member_id)
    }

    pub fn is_system(&self) -> bool {
        self.kind == MessageKind::System
    }
}

/// Input for persisting a message.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chat_id: ChatId,
    pub sender_id: Option<MemberId>,
    pub content: MessageContent,
}

impl NewMessage {
    /// A message is `Member` when it has a sender, `System` otherwise.
    pub fn kind(&self) -> MessageKind {
        if self.sender_id.is_some() {
            MessageKind::Member
        } else {
            MessageKind::System
        }
    }
}

/// Message content payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContent {
    pub text: String,
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Message kind enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Member,
    System,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::Member => write!(f, "member"),
            MessageKind::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for MessageKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "member" => Ok(MessageKind::Member),
            "system" => Ok(MessageKind::System),
            _ => Err(anyhow::anyhow!("Invalid message kind: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_envelope_field_names() {
        let message = Message {
            id: MessageId::new(),
            chat_id: ChatId::new(),
            sender_id: Some(MemberId::from("gpt-4o")),
            kind: MessageKind::Member,
            content: MessageContent::text("hello"),
            created_at: Utc::now(),
        };

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["senderId"], "gpt-4o");
        assert_eq!(value["type"], "MEMBER");
        assert_eq!(value["content"]["text"], "hello");
        assert!(value.get("chatId").is_some());
        assert!(value.get("createdAt").is_some());
    }

    #[test]
    fn test_system_message_without_sender_parses() {
        let json = serde_json::json!({
            "id": MessageId::new(),
            "chatId": ChatId::new(),
            "type": "SYSTEM",
            "content": { "text": "gpt-4o has joined the conversation." },
            "createdAt": "2024-05-01T12:00:00Z",
        });

        let message: Message = serde_json::from_value(json).unwrap();
        assert!(message.is_system());
        assert_eq!(message.sender_id, None);
    }

    #[test]
    fn test_new_message_kind_follows_sender() {
        let chat_id = ChatId::new();
        let system = NewMessage {
            chat_id,
            sender_id: None,
            content: MessageContent::text("context"),
        };
        let member = NewMessage {
            chat_id,
            sender_id: Some(MemberId::from("user")),
            content: MessageContent::text("hi"),
        };
        assert_eq!(system.kind(), MessageKind::System);
        assert_eq!(member.kind(), MessageKind::Member);
    }
}
