// Chat Router - Core
//
// Routes chat messages between a human and a set of AI agents over a topic
// broker, serializing replies per (agent, chat) and applying flow control.
//
// Domains live in domains/*; infrastructure adapters in kernel/.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::*;
