//! Typed ID definitions for all domain entities.
//!
//! Chats and messages are identified by time-ordered UUIDs. Members are
//! identified by stable, human-readable slugs (`user`, `gpt-4o`, ...) that
//! double as broker routing keys, so `MemberId` wraps a `String` instead.

use serde::{Deserialize, Serialize};
use std::fmt;

pub use super::id::Id;

// ============================================================================
// Entity marker types
// ============================================================================

/// Marker type for Chat entities.
pub struct Chat;

/// Marker type for Message entities.
pub struct Message;

// ============================================================================
// Type aliases - the primary API
// ============================================================================

/// Typed ID for Chat entities.
pub type ChatId = Id<Chat>;

/// Typed ID for Message entities.
pub type MessageId = Id<Message>;

// ============================================================================
// MemberId
// ============================================================================

/// Identifier of a chat member (the human or an agent).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for MemberId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for MemberId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
