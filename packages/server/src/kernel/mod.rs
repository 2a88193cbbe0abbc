//! Kernel module - server infrastructure and dependencies.

pub mod broker;
pub mod deps;
pub mod memory_broker;
pub mod nats;
pub mod stream_hub;
pub mod test_dependencies;
pub mod traits;

pub use broker::{topology, BaseTopicBroker, ControlHandler, ControlNotification, MessageHandler};
pub use deps::ServerDeps;
pub use memory_broker::{ExchangeKind, InMemoryBroker, TopologyEvent};
pub use nats::NatsBroker;
pub use stream_hub::StreamHub;
pub use test_dependencies::{MockReplyAgent, RecordingTransport, TestDependencies, TransportCall};
pub use traits::*;
