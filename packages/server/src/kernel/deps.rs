//! Server dependencies for the routing core (using traits for testability)
//!
//! This module provides the central dependency container shared by the chat
//! service and the orchestrator. All external services use trait abstractions
//! so tests can swap in the in-memory store, broker and transport.

use std::sync::Arc;

use crate::common::MemberId;
use crate::kernel::{BaseChatStore, BaseTopicBroker, BaseTransport};

/// Dependencies accessible to the routing core.
#[derive(Clone)]
pub struct ServerDeps {
    pub store: Arc<dyn BaseChatStore>,
    pub broker: Arc<dyn BaseTopicBroker>,
    /// Live client notifications (typing, published messages, pause state)
    pub transport: Arc<dyn BaseTransport>,
    /// Id of the single human participant.
    pub human_member_id: MemberId,
}

impl ServerDeps {
    pub fn new(
        store: Arc<dyn BaseChatStore>,
        broker: Arc<dyn BaseTopicBroker>,
        transport: Arc<dyn BaseTransport>,
        human_member_id: MemberId,
    ) -> Self {
        Self {
            store,
            broker,
            transport,
            human_member_id,
        }
    }
}
