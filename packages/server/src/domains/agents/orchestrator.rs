//! Routing orchestrator - wires agents to their chats and dispatches replies.
//!
//! Per delivered message, for agent A on chat C:
//! 1. skip A's own messages
//! 2. admission through the [`FlowController`] (human reset, pause capture,
//!    auto-pause)
//! 3. register with the [`SupersedingLock`] for (A, C)
//! 4. wait for the lock, apply the reply delay, ask A for a reply, publish it
//!
//! Steps 1-3 run synchronously inside the broker's consumer loop so lock
//! registration follows delivery order. Step 4 is the returned future.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::common::{ChatId, MemberId, RouterError};
use crate::domains::agents::flow::{Admission, FlowController, FlowSettings, FlowStatus};
use crate::domains::agents::lock::{RoutingKey, Superseded, SupersedingLock, Ticket};
use crate::domains::agents::registry::AgentRegistry;
use crate::domains::chatrooms::models::Message;
use crate::domains::chatrooms::ChatService;
use crate::kernel::{ControlHandler, ControlNotification, MessageHandler};

pub struct RoutingOrchestrator {
    chats: Arc<ChatService>,
    registry: AgentRegistry,
    lock: SupersedingLock,
    flow: FlowController,
    /// Chat consumers, one per (agent, chat). Held across the broker call so
    /// concurrent subscribes for one pair cannot both start a consumer.
    subscriptions: Mutex<HashMap<RoutingKey, JoinHandle<()>>>,
    control: Mutex<HashMap<MemberId, JoinHandle<()>>>,
}

impl RoutingOrchestrator {
    pub fn new(chats: Arc<ChatService>, registry: AgentRegistry, settings: FlowSettings) -> Arc<Self> {
        Arc::new(Self {
            chats,
            registry,
            lock: SupersedingLock::new(),
            flow: FlowController::new(settings),
            subscriptions: Mutex::new(HashMap::new()),
            control: Mutex::new(HashMap::new()),
        })
    }

    pub fn chats(&self) -> &Arc<ChatService> {
        &self.chats
    }

    pub fn lock(&self) -> &SupersedingLock {
        &self.lock
    }

    pub fn flow(&self) -> &FlowController {
        &self.flow
    }

    // =========================================================================
    // Startup and subscriptions
    // =========================================================================

    /// Subscribe every registered agent to its control queue and to every
    /// chat the directory lists it in.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let members = self.chats.members().await?;
        for member in members.iter().filter(|m| m.is_agent()) {
            if !self.registry.contains(&member.id) {
                warn!(agent_id = %member.id, "no reply implementation registered, skipping");
            }
        }

        for agent_id in self.registry.ids() {
            if !members.iter().any(|m| m.id == agent_id) {
                warn!(agent_id = %agent_id, "registered agent is not a known member, skipping");
                continue;
            }

            self.subscribe_control(&agent_id).await?;

            let chats = self.chats.directory().chats_for(&agent_id);
            for chat_id in &chats {
                if let Err(e) = self.subscribe(*chat_id, &agent_id).await {
                    error!(agent_id = %agent_id, chat_id = %chat_id, error = %e, "Failed to subscribe to chat");
                }
            }
            info!(agent_id = %agent_id, chats = chats.len(), "agent listening");
        }
        Ok(())
    }

    async fn subscribe_control(self: &Arc<Self>, agent_id: &MemberId) -> Result<()> {
        let mut control = self.control.lock().await;
        if control.get(agent_id).is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }

        let broker = &self.chats.deps().broker;
        broker.ensure_control_queue(agent_id).await?;
        let handle = broker
            .consume_control(agent_id, self.control_handler(agent_id.clone()))
            .await?;
        control.insert(agent_id.clone(), handle);
        Ok(())
    }

    /// Start consuming a chat for an agent unless a consumer is already running.
    ///
    /// A consumer still draining a queue that was deleted since (remove, then
    /// add again) is replaced.
    pub async fn subscribe(self: &Arc<Self>, chat_id: ChatId, agent_id: &MemberId) -> Result<()> {
        let key = RoutingKey::new(agent_id.clone(), chat_id);
        let broker = &self.chats.deps().broker;
        let mut subscriptions = self.subscriptions.lock().await;
        if subscriptions.get(&key).is_some_and(|h| !h.is_finished())
            && broker.is_consumed(chat_id, agent_id).await?
        {
            debug!(key = %key, "already consuming");
            return Ok(());
        }
        if let Some(stale) = subscriptions.remove(&key) {
            stale.abort();
        }

        broker.ensure_member_subscription(chat_id, agent_id).await?;
        let handle = broker
            .consume(chat_id, agent_id, self.message_handler(agent_id.clone()))
            .await?;
        subscriptions.insert(key, handle);

        debug!(agent_id = %agent_id, chat_id = %chat_id, "consuming chat");
        Ok(())
    }

    fn message_handler(self: &Arc<Self>, agent_id: MemberId) -> MessageHandler {
        let this = Arc::clone(self);
        Arc::new(move |message: Message| this.handle_message(&agent_id, message))
    }

    fn control_handler(self: &Arc<Self>, agent_id: MemberId) -> ControlHandler {
        let this = Arc::clone(self);
        Arc::new(move |notification: ControlNotification| {
            this.handle_control(&agent_id, notification)
        })
    }

    // =========================================================================
    // Message handling
    // =========================================================================

    /// Handle one delivery of `message` to `agent_id`.
    ///
    /// Admission and lock registration happen before this returns; the
    /// returned future waits for the lock and produces the reply.
    pub fn handle_message(self: &Arc<Self>, agent_id: &MemberId, message: Message) -> BoxFuture<'static, ()> {
        if message.is_from(agent_id) {
            return future::ready(()).boxed();
        }

        let key = RoutingKey::new(agent_id.clone(), message.chat_id);
        let from_human = message.is_from(self.chats.human_member_id());

        match self.flow.admit(&key, &message, from_human) {
            Admission::Proceed => {}
            Admission::Captured => {
                info!(agent_id = %agent_id, chat_id = %message.chat_id, message_id = %message.id, "paused, message held");
                return future::ready(()).boxed();
            }
            Admission::AutoPaused => {
                info!(agent_id = %agent_id, chat_id = %message.chat_id, message_id = %message.id, "auto-paused, message held");
                let this = Arc::clone(self);
                return async move {
                    this.chats.deps().transport.pause_status(true, true).await;
                }
                .boxed();
            }
        }

        let ticket = self.lock.acquire(key);
        let this = Arc::clone(self);
        async move { this.run_turn(ticket, message).await }.boxed()
    }

    async fn run_turn(&self, ticket: Ticket, message: Message) {
        let key = ticket.key().clone();
        let _guard = match ticket.wait().await {
            Ok(guard) => guard,
            Err(Superseded) => {
                debug!(key = %key, message_id = %message.id, "superseded by a newer message");
                return;
            }
        };

        let delay = self.flow.delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let RoutingKey { agent_id, chat_id } = key;
        // Held or queued turns can outlive a removal from the chat.
        match self.chats.chat(chat_id).await {
            Ok(chat) if chat.has_member(&agent_id) => {}
            Ok(_) => {
                debug!(agent_id = %agent_id, chat_id = %chat_id, message_id = %message.id, "no longer a member, dropping turn");
                return;
            }
            Err(e) => {
                error!(agent_id = %agent_id, chat_id = %chat_id, error = %e, "Failed to look up chat");
                return;
            }
        }

        let Some(agent) = self.registry.get(&agent_id) else {
            error!(error = %RouterError::UnknownAgent(agent_id.clone()), "cannot reply");
            return;
        };

        let transport = &self.chats.deps().transport;
        transport.typing(chat_id, &agent_id, true).await;
        let result = agent.reply(chat_id).await;
        transport.typing(chat_id, &agent_id, false).await;

        match result {
            Ok(Some(content)) if !content.is_empty() => {
                if let Err(e) = self
                    .chats
                    .publish_message(chat_id, content, Some(&agent_id))
                    .await
                {
                    error!(agent_id = %agent_id, chat_id = %chat_id, error = %e, "Failed to publish reply");
                }
            }
            Ok(_) => debug!(agent_id = %agent_id, chat_id = %chat_id, "nothing to say"),
            Err(source) => {
                let e = RouterError::ReplyCapability {
                    agent_id: agent_id.clone(),
                    source,
                };
                error!(chat_id = %chat_id, error = %e, "reply failed");
            }
        }
    }

    /// Handle a control notification addressed to `agent_id`.
    pub fn handle_control(
        self: &Arc<Self>,
        agent_id: &MemberId,
        notification: ControlNotification,
    ) -> BoxFuture<'static, ()> {
        let this = Arc::clone(self);
        let agent_id = agent_id.clone();
        async move {
            match notification {
                ControlNotification::NewChat { chat_id } => {
                    // Removed again before the notification arrived.
                    match this.chats.chat(chat_id).await {
                        Ok(chat) if chat.has_member(&agent_id) => {}
                        Ok(_) => {
                            debug!(agent_id = %agent_id, chat_id = %chat_id, "no longer a member, ignoring");
                            return;
                        }
                        Err(e) => {
                            error!(agent_id = %agent_id, chat_id = %chat_id, error = %e, "Failed to look up chat");
                            return;
                        }
                    }
                    this.chats
                        .directory()
                        .update(chat_id, std::slice::from_ref(&agent_id));
                    match this.subscribe(chat_id, &agent_id).await {
                        Ok(()) => info!(agent_id = %agent_id, chat_id = %chat_id, "joined chat"),
                        Err(e) => error!(agent_id = %agent_id, chat_id = %chat_id, error = %e, "Failed to join chat"),
                    }
                }
            }
        }
        .boxed()
    }

    // =========================================================================
    // Flow control
    // =========================================================================

    pub async fn pause(&self) {
        self.flow.pause();
        info!("message handling paused");
        self.chats.deps().transport.pause_status(true, false).await;
    }

    /// Resume and re-drive every held message. Returns the number re-driven.
    ///
    /// Handling runs on spawned tasks; this does not wait for replies.
    pub async fn resume(self: &Arc<Self>) -> usize {
        let backlog = self.flow.resume();
        info!(pending = backlog.len(), "message handling resumed");
        self.chats.deps().transport.pause_status(false, false).await;

        let count = backlog.len();
        for (key, message) in backlog {
            tokio::spawn(self.handle_message(&key.agent_id, message));
        }
        count
    }

    pub fn set_delay(&self, delay: Duration) {
        self.flow.set_delay(delay);
        info!(delay_ms = delay.as_millis() as u64, "reply delay set");
    }

    pub fn set_auto_pause(&self, enabled: bool, threshold: Option<u32>) {
        self.flow.set_auto_pause(enabled, threshold);
        info!(enabled, threshold = ?threshold, "auto-pause configured");
    }

    pub fn status(&self) -> FlowStatus {
        self.flow.status()
    }

    /// Stop every consumer task.
    pub async fn shutdown(&self) {
        for (_, handle) in self.subscriptions.lock().await.drain() {
            handle.abort();
        }
        for (_, handle) in self.control.lock().await.drain() {
            handle.abort();
        }
    }
}
