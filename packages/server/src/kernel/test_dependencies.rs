// TestDependencies - mock implementations for testing
//
// Provides a scripted reply agent, a recording transport and a ready-made
// ServerDeps wired to the in-memory store and broker.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{BaseReplyAgent, BaseTransport, InMemoryBroker, ServerDeps};
use crate::common::{ChatId, MemberId, MessageId};
use crate::domains::chatrooms::models::{Message, MessageContent};
use crate::domains::chatrooms::store::InMemoryChatStore;

// =============================================================================
// Mock Reply Agent
// =============================================================================

#[derive(Debug, Clone)]
enum Scripted {
    Reply(String),
    Silent,
    Fail(String),
}

#[derive(Default)]
struct Concurrency {
    current: HashMap<ChatId, usize>,
    max: HashMap<ChatId, usize>,
}

/// Reply agent with scripted responses, configurable latency and
/// per-chat concurrency tracking.
///
/// Without a script it answers every call with `"{name} reply {n}"`.
pub struct MockReplyAgent {
    name: String,
    latency: Duration,
    script: Arc<Mutex<VecDeque<Scripted>>>,
    fallback: Scripted,
    calls: Arc<Mutex<Vec<ChatId>>>,
    completed: Arc<Mutex<Vec<ChatId>>>,
    concurrency: Arc<Mutex<Concurrency>>,
}

impl MockReplyAgent {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            latency: Duration::ZERO,
            script: Arc::new(Mutex::new(VecDeque::new())),
            fallback: Scripted::Reply(String::new()),
            calls: Arc::new(Mutex::new(Vec::new())),
            completed: Arc::new(Mutex::new(Vec::new())),
            concurrency: Arc::new(Mutex::new(Concurrency::default())),
        }
    }

    /// Sleep this long inside every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue a reply for the next unscripted call.
    pub fn with_reply(self, text: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Reply(text.to_string()));
        self
    }

    /// Queue a "nothing to say" answer.
    pub fn with_silence(self) -> Self {
        self.script.lock().unwrap().push_back(Scripted::Silent);
        self
    }

    /// Queue a failure.
    pub fn with_failure(self, reason: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Fail(reason.to_string()));
        self
    }

    /// Never speak once the script is exhausted.
    pub fn always_silent(mut self) -> Self {
        self.fallback = Scripted::Silent;
        self
    }

    /// Fail every call once the script is exhausted.
    pub fn always_failing(mut self, reason: &str) -> Self {
        self.fallback = Scripted::Fail(reason.to_string());
        self
    }

    /// Chats of every call that started, in order.
    pub fn calls(&self) -> Vec<ChatId> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Number of calls for one chat.
    pub fn calls_for(&self, chat_id: ChatId) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| **c == chat_id)
            .count()
    }

    /// Number of calls that ran to completion.
    pub fn completed_count(&self) -> usize {
        self.completed.lock().unwrap().len()
    }

    /// Highest number of simultaneous calls observed for one chat.
    pub fn max_concurrency(&self, chat_id: ChatId) -> usize {
        self.concurrency
            .lock()
            .unwrap()
            .max
            .get(&chat_id)
            .copied()
            .unwrap_or(0)
    }

    fn next_answer(&self, call_number: usize) -> Scripted {
        let scripted = self.script.lock().unwrap().pop_front();
        match scripted {
            Some(answer) => answer,
            None => match &self.fallback {
                Scripted::Reply(text) if text.is_empty() => {
                    Scripted::Reply(format!("{} reply {}", self.name, call_number))
                }
                other => other.clone(),
            },
        }
    }
}

#[async_trait]
impl BaseReplyAgent for MockReplyAgent {
    async fn reply(&self, chat_id: ChatId) -> Result<Option<MessageContent>> {
        let call_number = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(chat_id);
            calls.len()
        };
        {
            let mut concurrency = self.concurrency.lock().unwrap();
            let current = {
                let entry = concurrency.current.entry(chat_id).or_insert(0);
                *entry += 1;
                *entry
            };
            let max = concurrency.max.entry(chat_id).or_insert(0);
            *max = (*max).max(current);
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        {
            let mut concurrency = self.concurrency.lock().unwrap();
            if let Some(current) = concurrency.current.get_mut(&chat_id) {
                *current -= 1;
            }
        }
        self.completed.lock().unwrap().push(chat_id);

        match self.next_answer(call_number) {
            Scripted::Reply(text) => Ok(Some(MessageContent::text(text))),
            Scripted::Silent => Ok(None),
            Scripted::Fail(reason) => Err(anyhow::anyhow!(reason)),
        }
    }
}

// =============================================================================
// Recording Transport
// =============================================================================

/// A live notification captured by [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    MessagePublished {
        message_id: MessageId,
        sender_id: Option<MemberId>,
    },
    Typing {
        chat_id: ChatId,
        member_id: MemberId,
        is_typing: bool,
    },
    PauseStatus {
        is_paused: bool,
        is_auto_pause: bool,
    },
}

#[derive(Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<TransportCall>>,
    messages: Mutex<Vec<Message>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Messages announced as published, in order.
    pub fn published_messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    /// Published messages authored by one member.
    pub fn messages_from(&self, member_id: &MemberId) -> Vec<Message> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.is_from(member_id))
            .cloned()
            .collect()
    }

    /// Pause notifications, in order.
    pub fn pause_statuses(&self) -> Vec<(bool, bool)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                TransportCall::PauseStatus {
                    is_paused,
                    is_auto_pause,
                } => Some((*is_paused, *is_auto_pause)),
                _ => None,
            })
            .collect()
    }

    /// Typing flags sent for one member, in order.
    pub fn typing_for(&self, member_id: &MemberId) -> Vec<bool> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                TransportCall::Typing {
                    member_id: m,
                    is_typing,
                    ..
                } if m == member_id => Some(*is_typing),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl BaseTransport for RecordingTransport {
    async fn message_published(&self, message: &Message) {
        self.calls.lock().unwrap().push(TransportCall::MessagePublished {
            message_id: message.id,
            sender_id: message.sender_id.clone(),
        });
        self.messages.lock().unwrap().push(message.clone());
    }

    async fn typing(&self, chat_id: ChatId, member_id: &MemberId, is_typing: bool) {
        self.calls.lock().unwrap().push(TransportCall::Typing {
            chat_id,
            member_id: member_id.clone(),
            is_typing,
        });
    }

    async fn pause_status(&self, is_paused: bool, is_auto_pause: bool) {
        self.calls.lock().unwrap().push(TransportCall::PauseStatus {
            is_paused,
            is_auto_pause,
        });
    }
}

// =============================================================================
// Test Dependencies
// =============================================================================

/// In-memory collaborators with handles kept for inspection.
#[derive(Clone)]
pub struct TestDependencies {
    pub store: Arc<InMemoryChatStore>,
    pub broker: Arc<InMemoryBroker>,
    pub transport: Arc<RecordingTransport>,
    pub human_member_id: MemberId,
}

impl TestDependencies {
    pub fn new() -> Self {
        let human_member_id = MemberId::from("user");
        Self {
            store: Arc::new(InMemoryChatStore::new(&human_member_id)),
            broker: Arc::new(InMemoryBroker::new()),
            transport: Arc::new(RecordingTransport::new()),
            human_member_id,
        }
    }

    pub fn server_deps(&self) -> ServerDeps {
        ServerDeps::new(
            self.store.clone(),
            self.broker.clone(),
            self.transport.clone(),
            self.human_member_id.clone(),
        )
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}
