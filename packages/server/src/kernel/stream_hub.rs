//! In-process pub/sub hub for real-time client notifications.
//!
//! Topic-keyed broadcast channels feed the SSE endpoint. Chat activity goes to
//! `chat:{chat_id}`; global pause changes go to `control`.
//!
//! # Usage
//!
//! Producers (routing core, via [`BaseTransport`]):
//!   transport.typing(chat_id, &member_id, true).await;
//!
//! Consumers (SSE endpoints):
//!   let rx = hub.subscribe("chat:abc-123").await;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};

use crate::common::{ChatId, MemberId};
use crate::domains::chatrooms::models::Message;
use crate::kernel::traits::BaseTransport;

/// Topic carrying global pause-state changes.
pub const CONTROL_TOPIC: &str = "control";

/// Topic carrying the activity of one chat.
pub fn chat_topic(chat_id: ChatId) -> String {
    format!("chat:{}", chat_id)
}

/// Event pushed to live clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportEvent {
    MessagePublished {
        message: Message,
    },
    #[serde(rename_all = "camelCase")]
    Typing {
        chat_id: ChatId,
        member_id: MemberId,
        is_typing: bool,
    },
    #[serde(rename_all = "camelCase")]
    PauseStatus {
        is_paused: bool,
        is_auto_pause: bool,
    },
}

/// Generic in-process pub/sub hub.
///
/// Thread-safe, cloneable. Keyed by string topics.
/// Payloads are `serde_json::Value`.
#[derive(Clone)]
pub struct StreamHub {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<serde_json::Value>>>>,
    capacity: usize,
}

impl StreamHub {
    /// Create a new StreamHub with default capacity (256 messages per channel).
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// Publish a JSON value to a topic. No-op if no subscribers.
    pub async fn publish(&self, topic: &str, value: serde_json::Value) {
        let channels = self.channels.read().await;
        if let Some(tx) = channels.get(topic) {
            let _ = tx.send(value);
        }
    }

    /// Subscribe to a topic. Creates the channel if it doesn't exist.
    pub async fn subscribe(&self, topic: &str) -> broadcast::Receiver<serde_json::Value> {
        let mut channels = self.channels.write().await;
        let tx = channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        tx.subscribe()
    }

    /// Remove channels with zero subscribers (housekeeping).
    pub async fn cleanup(&self) {
        let mut channels = self.channels.write().await;
        channels.retain(|_, tx| tx.receiver_count() > 0);
    }

    async fn emit(&self, topic: &str, event: TransportEvent) {
        match serde_json::to_value(&event) {
            Ok(value) => self.publish(topic, value).await,
            Err(e) => tracing::warn!(topic = %topic, error = %e, "Failed to serialize transport event"),
        }
    }
}

impl Default for StreamHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseTransport for StreamHub {
    async fn message_published(&self, message: &Message) {
        self.emit(
            &chat_topic(message.chat_id),
            TransportEvent::MessagePublished {
                message: message.clone(),
            },
        )
        .await;
    }

    async fn typing(&self, chat_id: ChatId, member_id: &MemberId, is_typing: bool) {
        self.emit(
            &chat_topic(chat_id),
            TransportEvent::Typing {
                chat_id,
                member_id: member_id.clone(),
                is_typing,
            },
        )
        .await;
    }

    async fn pause_status(&self, is_paused: bool, is_auto_pause: bool) {
        self.emit(
            CONTROL_TOPIC,
            TransportEvent::PauseStatus {
                is_paused,
                is_auto_pause,
            },
        )
        .await;
    }
}
