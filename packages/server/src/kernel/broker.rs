//! Topic broker abstraction.
//!
//! One fan-out topic per chat delivers every chat message to one durable
//! queue per member; a direct-routed control topic delivers notifications to
//! a single member's control queue. Membership changes are expressed purely
//! as queue bind/unbind operations, so the broker itself is the routing table.
//!
//! Two adapters implement [`BaseTopicBroker`]:
//! - [`crate::kernel::nats::NatsBroker`] - JetStream streams and durable consumers
//! - [`crate::kernel::memory_broker::InMemoryBroker`] - in-process, for tests and local runs

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::common::{ChatId, MemberId};
use crate::domains::chatrooms::models::Message;

/// Callback invoked once per delivered chat message.
///
/// The synchronous part of the call runs in delivery order; the returned
/// future is driven to completion before the delivery is acknowledged.
pub type MessageHandler = Arc<dyn Fn(Message) -> BoxFuture<'static, ()> + Send + Sync>;

/// Callback invoked once per delivered control notification.
pub type ControlHandler = Arc<dyn Fn(ControlNotification) -> BoxFuture<'static, ()> + Send + Sync>;

/// Out-of-band notification sent to a single member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "notification")]
pub enum ControlNotification {
    /// The member was added to a chat and should start consuming it.
    #[serde(rename = "NEW_CHAT", rename_all = "camelCase")]
    NewChat { chat_id: ChatId },
}

#[async_trait]
pub trait BaseTopicBroker: Send + Sync {
    /// Short adapter name, reported by the health endpoint.
    fn kind(&self) -> &'static str;

    /// Idempotently declare the direct-routed control topic.
    async fn ensure_control_exchange(&self) -> Result<()>;

    /// Idempotently declare a member's control queue, bound by member id.
    async fn ensure_control_queue(&self, member_id: &MemberId) -> Result<()>;

    /// Idempotently declare the fan-out topic of a chat.
    async fn ensure_chat_topic(&self, chat_id: ChatId) -> Result<()>;

    /// Idempotently declare a member's durable queue bound to the chat topic.
    ///
    /// Declares the chat topic as well when it is missing.
    async fn ensure_member_subscription(&self, chat_id: ChatId, member_id: &MemberId) -> Result<()>;

    /// Unbind and delete a member's queue for a chat.
    async fn remove_member_subscription(&self, chat_id: ChatId, member_id: &MemberId) -> Result<()>;

    /// Deliver a message to every queue bound to its chat's topic.
    ///
    /// Fails with [`crate::common::RouterError::Routing`] when the chat topic
    /// does not exist.
    async fn publish(&self, message: &Message) -> Result<()>;

    /// Deliver a notification to one member's control queue.
    async fn publish_control(&self, member_id: &MemberId, notification: &ControlNotification) -> Result<()>;

    /// Start consuming a member's chat queue. The returned task ends when the
    /// queue is deleted.
    async fn consume(
        &self,
        chat_id: ChatId,
        member_id: &MemberId,
        handler: MessageHandler,
    ) -> Result<JoinHandle<()>>;

    /// Whether a consumer is attached to the member's current chat queue.
    ///
    /// False when the queue was deleted and declared again since the last
    /// `consume`, even if the old consumer task has not ended yet.
    async fn is_consumed(&self, chat_id: ChatId, member_id: &MemberId) -> Result<bool>;

    /// Start consuming a member's control queue.
    async fn consume_control(&self, member_id: &MemberId, handler: ControlHandler) -> Result<JoinHandle<()>>;

    /// Flush outstanding work before the process exits.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Topology naming
// =============================================================================

/// Deterministic broker object names, shared by every adapter.
pub mod topology {
    use crate::common::{ChatId, MemberId};

    /// Name of the direct-routed control exchange.
    pub const CONTROL_EXCHANGE: &str = "service_exchange";

    /// Fan-out exchange of a chat.
    pub fn chat_exchange(chat_id: ChatId) -> String {
        format!("{}_exchange", chat_id)
    }

    /// Durable queue of one member on one chat.
    pub fn member_queue(chat_id: ChatId, member_id: &MemberId) -> String {
        format!("{}_{}_queue", chat_id, member_id)
    }

    /// Control queue of a member.
    pub fn control_queue(member_id: &MemberId) -> String {
        format!("{}_service_queue", member_id)
    }
}
