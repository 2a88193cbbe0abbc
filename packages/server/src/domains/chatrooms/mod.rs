//! Chatrooms domain - members, chats, messages and their broker topology.

pub mod directory;
pub mod models;
pub mod service;
pub mod store;

pub use directory::ChatDirectory;
pub use models::*;
pub use service::ChatService;
pub use store::{InMemoryChatStore, PostgresChatStore};
