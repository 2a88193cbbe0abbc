//! Structured error types for the routing core.
//!
//! Infrastructure adapters and collaborator traits return `anyhow::Result`;
//! the failures the routing core needs to tell apart are raised as
//! `RouterError` inside the `anyhow::Error` and recovered with
//! `downcast_ref::<RouterError>()` where it matters (HTTP status mapping,
//! tests).
//!
//! ```ignore
//! match chats.publish_message(chat_id, content, None).await {
//!     Ok(message) => { /* delivered */ }
//!     Err(e) => match e.downcast_ref::<RouterError>() {
//!         Some(RouterError::Routing { chat_id }) => warn!(%chat_id, "no topic"),
//!         _ => error!(error = %e, "publish failed"),
//!     },
//! }
//! ```

use thiserror::Error;

use crate::common::{ChatId, MemberId};

/// Failures surfaced by the routing core.
///
/// `Superseded` is deliberately absent: a superseded lock acquisition is a
/// normal short-circuit and is modelled by [`crate::domains::agents::Superseded`].
#[derive(Debug, Error)]
pub enum RouterError {
    /// The chat's topic does not exist (or the topology is misconfigured).
    #[error("no topic exists for chat {chat_id}")]
    Routing { chat_id: ChatId },

    /// An agent's reply capability failed.
    #[error("agent {agent_id} failed to produce a reply: {source}")]
    ReplyCapability {
        agent_id: MemberId,
        #[source]
        source: anyhow::Error,
    },

    /// The broker refused or failed to acknowledge a publish.
    #[error("broker did not accept message on {subject}: {reason}")]
    BrokerDelivery { subject: String, reason: String },

    #[error("member {0} not found")]
    MemberNotFound(MemberId),

    #[error("chat {0} not found")]
    ChatNotFound(ChatId),

    /// No reply implementation is registered for an agent member.
    #[error("no reply agent registered for member {0}")]
    UnknownAgent(MemberId),

    /// A broker envelope could not be (de)serialized.
    #[error("invalid message envelope: {0}")]
    Envelope(#[from] serde_json::Error),
}

impl RouterError {
    /// Whether the error refers to an entity that does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RouterError::MemberNotFound(_) | RouterError::ChatNotFound(_) | RouterError::UnknownAgent(_)
        )
    }
}
