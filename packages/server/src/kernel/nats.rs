//! NATS JetStream topic broker.
//!
//! Maps the chat/control topology onto JetStream:
//! - chat topic `{chat_id}_exchange` -> stream capturing `chats.{chat_id}`
//! - member queue `{chat_id}_{member_id}_queue` -> durable pull consumer on that stream
//! - control topic `service_exchange` -> stream capturing `service.>`
//! - control queue `{member_id}_service_queue` -> durable consumer filtered on `service.{member_id}`
//!
//! Every durable consumer sees every message of its stream, which gives the
//! fan-out semantics of the chat topic. Deliveries are acknowledged only once
//! the handler future has completed; while it runs, progress acks keep the
//! delivery from being redelivered.
//!
//! Queue names and subject tokens go through [`escape`], so distinct member
//! ids never share a consumer or a control subject.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_nats::jetstream::{
    self,
    consumer::{pull, AckPolicy, DeliverPolicy},
    stream::{self, RetentionPolicy},
    AckKind,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::common::{ChatId, MemberId, RouterError};
use crate::domains::chatrooms::models::Message;
use crate::kernel::broker::{
    topology, BaseTopicBroker, ControlHandler, ControlNotification, MessageHandler,
};

const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// How long JetStream waits for an ack before redelivering.
const ACK_WAIT: Duration = Duration::from_secs(30);
/// In-progress acks are sent this often while a handler runs.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

/// JetStream-backed broker.
pub struct NatsBroker {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    max_deliver: i64,
}

impl NatsBroker {
    /// Connect to a NATS server with JetStream enabled.
    pub async fn connect(url: &str, max_deliver: i64) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .with_context(|| format!("Failed to connect to NATS at {}", url))?;
        info!(url = %url, "Connected to NATS");
        Ok(Self::new(client, max_deliver))
    }

    pub fn new(client: async_nats::Client, max_deliver: i64) -> Self {
        let jetstream = jetstream::new(client.clone());
        Self {
            client,
            jetstream,
            max_deliver,
        }
    }

    async fn chat_stream(&self, chat_id: ChatId) -> Result<stream::Stream> {
        let stream = self
            .jetstream
            .get_or_create_stream(stream::Config {
                name: topology::chat_exchange(chat_id),
                subjects: vec![chat_subject(chat_id)],
                retention: RetentionPolicy::Limits,
                ..Default::default()
            })
            .await
            .with_context(|| format!("Failed to declare stream for chat {}", chat_id))?;
        Ok(stream)
    }

    async fn control_stream(&self) -> Result<stream::Stream> {
        let stream = self
            .jetstream
            .get_or_create_stream(stream::Config {
                name: topology::CONTROL_EXCHANGE.to_string(),
                subjects: vec![format!("{}.>", CONTROL_SUBJECT_PREFIX)],
                retention: RetentionPolicy::Limits,
                ..Default::default()
            })
            .await
            .context("Failed to declare control stream")?;
        Ok(stream)
    }

    async fn publish_acked(&self, subject: String, payload: Bytes) -> Result<()> {
        let ack = self
            .jetstream
            .publish(subject.clone(), payload)
            .await
            .map_err(|e| RouterError::BrokerDelivery {
                subject: subject.clone(),
                reason: e.to_string(),
            })?;
        ack.await.map_err(|e| RouterError::BrokerDelivery {
            subject,
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

fn consumer_config(name: &str, filter_subject: String, max_deliver: i64) -> pull::Config {
    pull::Config {
        durable_name: Some(name.to_string()),
        filter_subject,
        ack_policy: AckPolicy::Explicit,
        ack_wait: ACK_WAIT,
        deliver_policy: DeliverPolicy::New,
        max_deliver,
        ..Default::default()
    }
}

const CHAT_SUBJECT_PREFIX: &str = "chats";
const CONTROL_SUBJECT_PREFIX: &str = "service";

fn chat_subject(chat_id: ChatId) -> String {
    format!("{}.{}", CHAT_SUBJECT_PREFIX, chat_id)
}

fn control_subject(member_id: &MemberId) -> String {
    format!("{}.{}", CONTROL_SUBJECT_PREFIX, escape(member_id.as_str()))
}

/// Encode a name into `[A-Za-z0-9_-]` for JetStream names and subject tokens.
///
/// `_` becomes `__` and every other byte outside the set becomes `_XX` (hex),
/// which keeps the encoding injective.
fn escape(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'_' => out.push_str("__"),
            b if b.is_ascii_alphanumeric() || b == b'-' => out.push(b as char),
            b => out.push_str(&format!("_{:02X}", b)),
        }
    }
    out
}

#[async_trait]
impl BaseTopicBroker for NatsBroker {
    fn kind(&self) -> &'static str {
        "nats"
    }

    async fn ensure_control_exchange(&self) -> Result<()> {
        self.control_stream().await?;
        Ok(())
    }

    async fn ensure_control_queue(&self, member_id: &MemberId) -> Result<()> {
        let stream = self.control_stream().await?;
        let name = escape(&topology::control_queue(member_id));
        stream
            .get_or_create_consumer(&name, consumer_config(&name, control_subject(member_id), self.max_deliver))
            .await
            .with_context(|| format!("Failed to declare control consumer {}", name))?;
        debug!(consumer = %name, "control queue ready");
        Ok(())
    }

    async fn ensure_chat_topic(&self, chat_id: ChatId) -> Result<()> {
        self.chat_stream(chat_id).await?;
        Ok(())
    }

    async fn ensure_member_subscription(&self, chat_id: ChatId, member_id: &MemberId) -> Result<()> {
        let stream = self.chat_stream(chat_id).await?;
        let name = escape(&topology::member_queue(chat_id, member_id));
        stream
            .get_or_create_consumer(&name, consumer_config(&name, chat_subject(chat_id), self.max_deliver))
            .await
            .with_context(|| format!("Failed to declare consumer {}", name))?;
        debug!(consumer = %name, chat_id = %chat_id, "member queue ready");
        Ok(())
    }

    async fn remove_member_subscription(&self, chat_id: ChatId, member_id: &MemberId) -> Result<()> {
        let Ok(stream) = self.jetstream.get_stream(topology::chat_exchange(chat_id)).await else {
            return Ok(());
        };
        let name = escape(&topology::member_queue(chat_id, member_id));
        if let Err(e) = stream.delete_consumer(&name).await {
            debug!(consumer = %name, error = %e, "consumer already absent");
        }
        Ok(())
    }

    async fn publish(&self, message: &Message) -> Result<()> {
        if self
            .jetstream
            .get_stream(topology::chat_exchange(message.chat_id))
            .await
            .is_err()
        {
            return Err(RouterError::Routing {
                chat_id: message.chat_id,
            }
            .into());
        }

        let payload = Bytes::from(serde_json::to_vec(message).map_err(RouterError::from)?);
        self.publish_acked(chat_subject(message.chat_id), payload).await?;
        debug!(chat_id = %message.chat_id, message_id = %message.id, "message published");
        Ok(())
    }

    async fn publish_control(&self, member_id: &MemberId, notification: &ControlNotification) -> Result<()> {
        let payload = Bytes::from(serde_json::to_vec(notification).map_err(RouterError::from)?);
        self.publish_acked(control_subject(member_id), payload).await
    }

    async fn consume(
        &self,
        chat_id: ChatId,
        member_id: &MemberId,
        handler: MessageHandler,
    ) -> Result<JoinHandle<()>> {
        let stream = self
            .jetstream
            .get_stream(topology::chat_exchange(chat_id))
            .await
            .map_err(|_| RouterError::Routing { chat_id })?;
        let name = escape(&topology::member_queue(chat_id, member_id));
        stream
            .get_consumer::<pull::Config>(&name)
            .await
            .map_err(|e| anyhow::anyhow!(e))
            .with_context(|| format!("Consumer {} does not exist", name))?;

        Ok(tokio::spawn(run_consumer(stream, name, handler)))
    }

    /// A live pull loop re-attaches to a durable consumer declared again under
    /// the same name, so an existing durable counts as consumed.
    async fn is_consumed(&self, chat_id: ChatId, member_id: &MemberId) -> Result<bool> {
        let Ok(stream) = self.jetstream.get_stream(topology::chat_exchange(chat_id)).await else {
            return Ok(false);
        };
        let name = escape(&topology::member_queue(chat_id, member_id));
        Ok(stream.get_consumer::<pull::Config>(&name).await.is_ok())
    }

    async fn consume_control(&self, member_id: &MemberId, handler: ControlHandler) -> Result<JoinHandle<()>> {
        let stream = self.control_stream().await?;
        let name = escape(&topology::control_queue(member_id));
        stream
            .get_consumer::<pull::Config>(&name)
            .await
            .map_err(|e| anyhow::anyhow!(e))
            .with_context(|| format!("Consumer {} does not exist", name))?;

        Ok(tokio::spawn(run_consumer(stream, name, handler)))
    }

    async fn shutdown(&self) -> Result<()> {
        self.client.flush().await.context("Failed to flush NATS client")?;
        Ok(())
    }
}

/// Pull deliveries from a durable consumer until it is deleted.
///
/// Stream errors trigger an exponential backoff, after which the consumer is
/// looked up again; a consumer that no longer exists ends the loop.
async fn run_consumer<T>(
    stream: stream::Stream,
    name: String,
    handler: Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>,
) where
    T: DeserializeOwned + Send + 'static,
{
    let mut backoff = INITIAL_BACKOFF;

    loop {
        let consumer = match stream.get_consumer::<pull::Config>(&name).await {
            Ok(consumer) => consumer,
            Err(e) => {
                debug!(consumer = %name, error = %e, "consumer gone, stopping");
                return;
            }
        };

        match consumer.messages().await {
            Ok(mut messages) => {
                while let Some(delivery) = messages.next().await {
                    match delivery {
                        Ok(message) => {
                            backoff = INITIAL_BACKOFF;
                            dispatch(&name, message, &handler).await;
                        }
                        Err(e) => {
                            warn!(consumer = %name, error = %e, "delivery stream failed");
                            break;
                        }
                    }
                }
            }
            Err(e) => warn!(consumer = %name, error = %e, "Failed to open delivery stream"),
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

/// Hand one delivery to the handler.
///
/// The handler's synchronous part runs here, in delivery order; its future
/// runs on its own task and the delivery is acked when it completes.
async fn dispatch<T>(
    consumer: &str,
    message: jetstream::Message,
    handler: &Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>,
) where
    T: DeserializeOwned + Send + 'static,
{
    match serde_json::from_slice::<T>(&message.payload) {
        Ok(item) => {
            let work = handler(item);
            let consumer = consumer.to_string();
            tokio::spawn(async move {
                {
                    let message = &message;
                    let consumer = consumer.as_str();
                    with_progress(work, PROGRESS_INTERVAL, move || async move {
                        if let Err(e) = message.ack_with(AckKind::Progress).await {
                            warn!(consumer = %consumer, error = %e, "Failed to send progress ack");
                        }
                    })
                    .await;
                }
                if let Err(e) = message.ack().await {
                    warn!(consumer = %consumer, error = %e, "Failed to ack delivery");
                }
            });
        }
        Err(e) => {
            warn!(consumer = %consumer, error = %e, "Failed to parse message, rejecting");
            if let Err(e) = message.ack_with(AckKind::Nak(None)).await {
                warn!(consumer = %consumer, error = %e, "Failed to nak delivery");
            }
        }
    }
}

/// Drive `work` to completion, calling `progress` every `every` until it is done.
async fn with_progress<W, P, F>(work: W, every: Duration, mut progress: P)
where
    W: Future<Output = ()>,
    P: FnMut() -> F,
    F: Future<Output = ()>,
{
    tokio::pin!(work);
    let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    loop {
        tokio::select! {
            _ = &mut work => return,
            _ = ticks.tick() => progress().await,
        }
    }
}
