//! In-process topic broker.
//!
//! Mirrors the exchange/queue topology of a real deployment with plain tokio
//! channels: a queue buffers serialized envelopes until a consumer attaches,
//! so nothing published between `ensure_member_subscription` and `consume`
//! is lost. Topology changes are recorded so tests can assert on them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::common::{ChatId, MemberId, RouterError};
use crate::domains::chatrooms::models::Message;
use crate::kernel::broker::{
    topology, BaseTopicBroker, ControlHandler, ControlNotification, MessageHandler,
};

/// Exchange routing behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Fanout,
    Direct,
}

/// A topology change, recorded in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyEvent {
    ExchangeCreated { name: String, kind: ExchangeKind },
    QueueCreated { name: String },
    QueueBound { queue: String, exchange: String, routing_key: String },
    QueueDeleted { name: String },
}

struct Binding {
    queue: String,
    routing_key: String,
}

struct Exchange {
    kind: ExchangeKind,
    bindings: Vec<Binding>,
}

struct Queue {
    tx: mpsc::UnboundedSender<Bytes>,
    /// Taken by the consumer when one attaches.
    rx: Option<mpsc::UnboundedReceiver<Bytes>>,
}

#[derive(Default)]
struct State {
    exchanges: HashMap<String, Exchange>,
    queues: HashMap<String, Queue>,
    events: Vec<TopologyEvent>,
    published: usize,
}

impl State {
    fn declare_exchange(&mut self, name: &str, kind: ExchangeKind) {
        if self.exchanges.contains_key(name) {
            return;
        }
        self.exchanges.insert(
            name.to_string(),
            Exchange {
                kind,
                bindings: Vec::new(),
            },
        );
        self.events.push(TopologyEvent::ExchangeCreated {
            name: name.to_string(),
            kind,
        });
    }

    fn declare_queue(&mut self, name: &str) {
        if self.queues.contains_key(name) {
            return;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.queues.insert(name.to_string(), Queue { tx, rx: Some(rx) });
        self.events.push(TopologyEvent::QueueCreated {
            name: name.to_string(),
        });
    }

    fn bind(&mut self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        let Some(target) = self.exchanges.get_mut(exchange) else {
            bail!("exchange {} does not exist", exchange);
        };
        let already_bound = target
            .bindings
            .iter()
            .any(|b| b.queue == queue && b.routing_key == routing_key);
        if already_bound {
            return Ok(());
        }
        target.bindings.push(Binding {
            queue: queue.to_string(),
            routing_key: routing_key.to_string(),
        });
        self.events.push(TopologyEvent::QueueBound {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
        });
        Ok(())
    }

    /// Send a payload to every queue of `exchange` matching `routing_key`.
    /// Returns the number of queues reached.
    fn route(&mut self, exchange: &str, routing_key: &str, payload: Bytes) -> Option<usize> {
        let target = self.exchanges.get(exchange)?;
        let mut delivered = 0;
        for binding in &target.bindings {
            let matches = match target.kind {
                ExchangeKind::Fanout => true,
                ExchangeKind::Direct => binding.routing_key == routing_key,
            };
            if !matches {
                continue;
            }
            match self.queues.get(&binding.queue) {
                Some(queue) if queue.tx.send(payload.clone()).is_ok() => delivered += 1,
                _ => warn!(queue = %binding.queue, "bound queue is gone, dropping delivery"),
            }
        }
        self.published += 1;
        Some(delivered)
    }

    fn take_receiver(&mut self, queue: &str) -> Result<mpsc::UnboundedReceiver<Bytes>> {
        let Some(entry) = self.queues.get_mut(queue) else {
            bail!("queue {} does not exist", queue);
        };
        match entry.rx.take() {
            Some(rx) => Ok(rx),
            None => bail!("queue {} already has a consumer", queue),
        }
    }
}

/// In-process broker implementing the chat/control topology.
#[derive(Default)]
pub struct InMemoryBroker {
    state: Mutex<State>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// All topology changes, oldest first.
    pub fn topology_events(&self) -> Vec<TopologyEvent> {
        self.state().events.clone()
    }

    /// Names of all declared exchanges.
    pub fn exchanges(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state().exchanges.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.state().queues.contains_key(name)
    }

    /// Queues currently bound to an exchange.
    pub fn bound_queues(&self, exchange: &str) -> Vec<String> {
        self.state()
            .exchanges
            .get(exchange)
            .map(|e| e.bindings.iter().map(|b| b.queue.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of successful publish calls (chat and control).
    pub fn publish_count(&self) -> usize {
        self.state().published
    }

    /// Push a raw payload straight into a queue, bypassing serialization.
    pub fn inject_raw(&self, queue: &str, payload: Bytes) -> Result<()> {
        let state = self.state();
        let Some(entry) = state.queues.get(queue) else {
            bail!("queue {} does not exist", queue);
        };
        entry
            .tx
            .send(payload)
            .map_err(|_| anyhow::anyhow!("queue {} is closed", queue))
    }
}

#[async_trait]
impl BaseTopicBroker for InMemoryBroker {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn ensure_control_exchange(&self) -> Result<()> {
        self.state()
            .declare_exchange(topology::CONTROL_EXCHANGE, ExchangeKind::Direct);
        Ok(())
    }

    async fn ensure_control_queue(&self, member_id: &MemberId) -> Result<()> {
        let queue = topology::control_queue(member_id);
        let mut state = self.state();
        state.declare_exchange(topology::CONTROL_EXCHANGE, ExchangeKind::Direct);
        state.declare_queue(&queue);
        state.bind(&queue, topology::CONTROL_EXCHANGE, member_id.as_str())
    }

    async fn ensure_chat_topic(&self, chat_id: ChatId) -> Result<()> {
        self.state()
            .declare_exchange(&topology::chat_exchange(chat_id), ExchangeKind::Fanout);
        Ok(())
    }

    async fn ensure_member_subscription(&self, chat_id: ChatId, member_id: &MemberId) -> Result<()> {
        let exchange = topology::chat_exchange(chat_id);
        let queue = topology::member_queue(chat_id, member_id);
        let mut state = self.state();
        state.declare_exchange(&exchange, ExchangeKind::Fanout);
        state.declare_queue(&queue);
        state.bind(&queue, &exchange, "")
    }

    async fn remove_member_subscription(&self, chat_id: ChatId, member_id: &MemberId) -> Result<()> {
        let exchange = topology::chat_exchange(chat_id);
        let queue = topology::member_queue(chat_id, member_id);
        let mut state = self.state();
        if let Some(target) = state.exchanges.get_mut(&exchange) {
            target.bindings.retain(|b| b.queue != queue);
        }
        // Dropping the sender ends the consumer once the backlog is drained.
        if state.queues.remove(&queue).is_some() {
            state.events.push(TopologyEvent::QueueDeleted { name: queue });
        }
        Ok(())
    }

    async fn publish(&self, message: &Message) -> Result<()> {
        let payload = Bytes::from(serde_json::to_vec(message).map_err(RouterError::from)?);
        let exchange = topology::chat_exchange(message.chat_id);

        match self.state().route(&exchange, "", payload) {
            Some(delivered) => {
                debug!(chat_id = %message.chat_id, message_id = %message.id, delivered, "message published");
                Ok(())
            }
            None => Err(RouterError::Routing {
                chat_id: message.chat_id,
            }
            .into()),
        }
    }

    async fn publish_control(&self, member_id: &MemberId, notification: &ControlNotification) -> Result<()> {
        let payload = Bytes::from(serde_json::to_vec(notification).map_err(RouterError::from)?);

        match self
            .state()
            .route(topology::CONTROL_EXCHANGE, member_id.as_str(), payload)
        {
            Some(0) => {
                warn!(member_id = %member_id, "control notification was unroutable");
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(RouterError::BrokerDelivery {
                subject: topology::CONTROL_EXCHANGE.to_string(),
                reason: "exchange does not exist".to_string(),
            }
            .into()),
        }
    }

    async fn consume(
        &self,
        chat_id: ChatId,
        member_id: &MemberId,
        handler: MessageHandler,
    ) -> Result<JoinHandle<()>> {
        let queue = topology::member_queue(chat_id, member_id);
        let rx = self.state().take_receiver(&queue)?;
        Ok(spawn_consumer(queue, rx, handler))
    }

    async fn is_consumed(&self, chat_id: ChatId, member_id: &MemberId) -> Result<bool> {
        let queue = topology::member_queue(chat_id, member_id);
        Ok(self
            .state()
            .queues
            .get(&queue)
            .is_some_and(|entry| entry.rx.is_none()))
    }

    async fn consume_control(&self, member_id: &MemberId, handler: ControlHandler) -> Result<JoinHandle<()>> {
        let queue = topology::control_queue(member_id);
        let rx = self.state().take_receiver(&queue)?;
        Ok(spawn_consumer(queue, rx, handler))
    }
}

/// Drain a queue, invoking the handler once per parsed envelope.
///
/// The handler is called in delivery order; each returned future runs on its
/// own task. Payloads that fail to parse are dropped with a warning.
fn spawn_consumer<T>(
    queue: String,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    handler: Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>,
) -> JoinHandle<()>
where
    T: DeserializeOwned + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            match serde_json::from_slice::<T>(&payload) {
                Ok(item) => {
                    tokio::spawn(handler(item));
                }
                Err(e) => {
                    warn!(queue = %queue, error = %e, "Failed to parse message, rejecting");
                }
            }
        }
        debug!(queue = %queue, "queue deleted, consumer stopped");
    })
}
