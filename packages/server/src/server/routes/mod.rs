// HTTP routes
pub mod chats;
pub mod error;
pub mod health;
pub mod program;
pub mod stream;

pub use chats::*;
pub use error::ApiError;
pub use health::*;
pub use program::*;
pub use stream::*;
