//! Chat storage adapters.

mod memory;
mod postgres;

pub use memory::InMemoryChatStore;
pub use postgres::PostgresChatStore;
