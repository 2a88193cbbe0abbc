//! Reply agent backed by an OpenAI-compatible chat completions endpoint.
//!
//! Agents are declared in a JSON file (see [`load_agent_specs`]) and each one
//! becomes an agent member plus a registered reply implementation.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::common::{ChatId, MemberId};
use crate::domains::chatrooms::models::{Member, Message, MessageContent};
use crate::kernel::{BaseChatStore, BaseReplyAgent};

/// Reply text meaning "nothing to add", matched case-insensitively.
pub const SILENCE_MARKER: &str = "NIHIL DICENDUM";

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// One entry of the agents file.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSpec {
    pub member_id: MemberId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub system_message: Option<String>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}

impl AgentSpec {
    /// The member record this agent is provisioned as.
    pub fn member(&self) -> Member {
        let member = Member::agent(self.member_id.clone(), self.name.clone());
        match &self.description {
            Some(description) => member.with_description(description.clone()),
            None => member,
        }
    }
}

/// Read and parse an agents file.
pub fn load_agent_specs(path: &Path) -> Result<Vec<AgentSpec>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read agents file {}", path.display()))?;
    let specs: Vec<AgentSpec> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse agents file {}", path.display()))?;
    Ok(specs)
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Deserialize)]
struct ChatResponseRaw {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

// =============================================================================
// Agent
// =============================================================================

pub struct OpenAiCompatibleAgent {
    member_id: MemberId,
    model: String,
    system_message: Option<String>,
    base_url: String,
    api_key: Option<String>,
    http_client: Client,
    store: Arc<dyn BaseChatStore>,
}

impl OpenAiCompatibleAgent {
    /// Build an agent from its spec. The API key is read from the spec's
    /// environment variable; local servers may run without one.
    pub fn from_spec(spec: &AgentSpec, store: Arc<dyn BaseChatStore>) -> Self {
        let api_key = std::env::var(&spec.api_key_env).ok();
        if api_key.is_none() {
            warn!(
                agent_id = %spec.member_id,
                env = %spec.api_key_env,
                "API key not set, sending unauthenticated requests"
            );
        }
        Self {
            member_id: spec.member_id.clone(),
            model: spec.model.clone(),
            system_message: spec.system_message.clone(),
            base_url: spec.base_url.trim_end_matches('/').to_string(),
            api_key,
            http_client: Client::new(),
            store,
        }
    }

    /// Map chat history onto completion messages.
    ///
    /// Returns `None` when this agent spoke last.
    pub(crate) fn conversation(&self, history: &[Message]) -> Option<Vec<ChatMessage>> {
        if history.last().is_some_and(|m| m.is_from(&self.member_id)) {
            return None;
        }

        let mut messages = Vec::with_capacity(history.len() + 1);
        if let Some(system) = &self.system_message {
            messages.push(ChatMessage {
                role: "system",
                content: system.clone(),
            });
        }
        for message in history {
            let entry = match &message.sender_id {
                None => ChatMessage {
                    role: "system",
                    content: message.content.text.clone(),
                },
                Some(sender) if sender == &self.member_id => ChatMessage {
                    role: "assistant",
                    content: message.content.text.clone(),
                },
                Some(sender) => ChatMessage {
                    role: "user",
                    content: format!("{}: {}", sender, message.content.text),
                },
            };
            messages.push(entry);
        }
        Some(messages)
    }

    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<Option<String>> {
        let start = std::time::Instant::now();

        let mut request = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&ChatRequest {
                model: &self.model,
                messages,
            });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .context("Chat completion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Chat completion API error {}: {}", status, error_text);
        }

        let body: ChatResponseRaw = response
            .json()
            .await
            .context("Failed to parse chat completion response")?;

        debug!(
            agent_id = %self.member_id,
            model = %self.model,
            duration_ms = start.elapsed().as_millis(),
            "chat completion"
        );

        Ok(body.choices.into_iter().next().and_then(|c| c.message.content))
    }
}

/// Whether a model answer means "nothing to say".
pub fn is_silence(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.is_empty() || trimmed.to_uppercase().contains(SILENCE_MARKER)
}

#[async_trait]
impl BaseReplyAgent for OpenAiCompatibleAgent {
    async fn reply(&self, chat_id: ChatId) -> Result<Option<MessageContent>> {
        let history = self.store.get_conversation_history(chat_id).await?;
        let Some(messages) = self.conversation(&history) else {
            debug!(agent_id = %self.member_id, chat_id = %chat_id, "spoke last, skipping");
            return Ok(None);
        };

        match self.complete(messages).await? {
            Some(text) if !is_silence(&text) => Ok(Some(MessageContent::text(text))),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::MessageId;
    use crate::domains::chatrooms::models::MessageKind;
    use crate::domains::chatrooms::store::InMemoryChatStore;

    fn agent() -> OpenAiCompatibleAgent {
        let spec: AgentSpec = serde_json::from_value(serde_json::json!({
            "member_id": "gpt-4o",
            "name": "ChatGPT",
            "model": "gpt-4o",
            "api_key_env": "ROUTER_TEST_UNSET_KEY",
            "system_message": "Your name is ChatGPT."
        }))
        .unwrap();
        let store = Arc::new(InMemoryChatStore::new(&MemberId::from("user")));
        OpenAiCompatibleAgent::from_spec(&spec, store)
    }

    fn message(sender: Option<&str>, text: &str) -> Message {
        Message {
            id: MessageId::new(),
            chat_id: ChatId::new(),
            sender_id: sender.map(MemberId::from),
            kind: if sender.is_some() {
                MessageKind::Member
            } else {
                MessageKind::System
            },
            content: MessageContent::text(text),
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_spec_defaults() {
        let spec: AgentSpec = serde_json::from_value(serde_json::json!({
            "member_id": "llama3",
            "name": "Llama",
            "model": "llama3"
        }))
        .unwrap();
        assert_eq!(spec.base_url, DEFAULT_BASE_URL);
        assert_eq!(spec.api_key_env, DEFAULT_API_KEY_ENV);
        assert!(spec.member().is_agent());
    }

    #[test]
    fn test_conversation_roles() {
        let agent = agent();
        let history = vec![
            message(None, "Conversation created"),
            message(Some("user"), "hello"),
            message(Some("gpt-4o"), "hi there"),
            message(Some("llama3"), "greetings"),
        ];

        let messages = agent.conversation(&history).unwrap();
        let roles: Vec<_> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec!["system", "system", "user", "assistant", "user"]);
        assert_eq!(messages[2].content, "user: hello");
        assert_eq!(messages[3].content, "hi there");
        assert_eq!(messages[4].content, "llama3: greetings");
    }

    #[test]
    fn test_no_conversation_when_agent_spoke_last() {
        let agent = agent();
        let history = vec![message(Some("user"), "hello"), message(Some("gpt-4o"), "hi")];
        assert!(agent.conversation(&history).is_none());
    }

    #[test]
    fn test_silence_marker() {
        assert!(is_silence("NIHIL DICENDUM"));
        assert!(is_silence("ChatGPT: nihil dicendum."));
        assert!(is_silence("   "));
        assert!(!is_silence("I have something to add."));
    }
}
