pub mod chatroom;
pub mod member;

pub use chatroom::{Chat, Message, MessageContent, MessageKind, NewChat, NewMessage};
pub use member::{Member, MemberKind};
