//! Agents domain - routing of chat messages to reply agents.
//!
//! Consumes the chat topics of every registered agent, gates deliveries
//! through flow control and the superseding lock, and publishes replies.
//!
//! Dependency direction: agents → chatrooms (reads history, publishes replies)
//! Chatrooms has no knowledge of agents.

pub mod flow;
pub mod lock;
pub mod openai;
pub mod orchestrator;
pub mod registry;

pub use flow::{Admission, FlowController, FlowSettings, FlowStatus};
pub use lock::{LockGuard, RoutingKey, Superseded, SupersedingLock, Ticket};
pub use openai::{load_agent_specs, AgentSpec, OpenAiCompatibleAgent};
pub use orchestrator::RoutingOrchestrator;
pub use registry::AgentRegistry;
