//! In-process router harness.
//!
//! Wires the chat service and orchestrator to the in-memory store, broker
//! and a recording transport, with one scripted mock agent per agent id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chat_router::common::{ChatId, MemberId};
use chat_router::domains::agents::{AgentRegistry, FlowSettings, RoutingOrchestrator};
use chat_router::domains::chatrooms::{ChatService, Member, Message, MessageContent};
use chat_router::kernel::{MockReplyAgent, TestDependencies};

pub struct RouterHarness {
    pub deps: TestDependencies,
    pub chats: Arc<ChatService>,
    pub orchestrator: Arc<RoutingOrchestrator>,
    agents: HashMap<MemberId, Arc<MockReplyAgent>>,
}

impl RouterHarness {
    /// Provision the human plus one agent member per mock, register the
    /// mocks and start the orchestrator.
    pub async fn start(agents: Vec<(&str, MockReplyAgent)>, settings: FlowSettings) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let deps = TestDependencies::new();
        let chats = Arc::new(ChatService::new(deps.server_deps()));

        let mut members = vec![Member::human(deps.human_member_id.clone(), "User")];
        let mut registry = AgentRegistry::new();
        let mut handles = HashMap::new();
        for (id, agent) in agents {
            let agent = Arc::new(agent);
            members.push(Member::agent(id, id.to_uppercase()));
            registry.register(id, agent.clone());
            handles.insert(MemberId::from(id), agent);
        }

        chats.provision_members(&members).await.unwrap();
        chats.ensure_control_queues().await.unwrap();
        chats.load_directory().await.unwrap();

        let orchestrator = RoutingOrchestrator::new(chats.clone(), registry, settings);
        orchestrator.start().await.unwrap();

        Self {
            deps,
            chats,
            orchestrator,
            agents: handles,
        }
    }

    pub fn agent(&self, id: &str) -> Arc<MockReplyAgent> {
        self.agents[&MemberId::from(id)].clone()
    }

    pub fn human(&self) -> MemberId {
        self.deps.human_member_id.clone()
    }

    /// Create a chat with the given agents (the human is always added).
    pub async fn create_chat(&self, agents: &[&str], topic: Option<&str>) -> ChatId {
        let member_ids = agents.iter().map(|id| MemberId::from(*id)).collect();
        self.chats
            .create_chat(member_ids, None, topic.map(str::to_string))
            .await
            .unwrap()
            .id
    }

    /// Post a message as the human member.
    pub async fn say(&self, chat_id: ChatId, text: &str) -> Message {
        self.chats
            .publish_message(chat_id, MessageContent::text(text), Some(&self.human()))
            .await
            .unwrap()
    }

    /// Messages published by one member, oldest first.
    pub fn replies_from(&self, id: &str) -> Vec<Message> {
        self.deps.transport.messages_from(&MemberId::from(id))
    }

    /// No (agent, chat) pair holds the lock.
    pub fn is_idle(&self) -> bool {
        self.orchestrator.lock().is_empty()
    }
}

/// Poll `condition` every 10ms; panic after two seconds.
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting until {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Let spawned consumers and reply tasks run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}
