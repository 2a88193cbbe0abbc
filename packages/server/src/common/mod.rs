// Common types shared across the kernel and domain layers

pub mod entity_ids;
pub mod error;
pub mod id;

pub use entity_ids::{ChatId, MemberId, MessageId};
pub use error::RouterError;
pub use id::Id;
