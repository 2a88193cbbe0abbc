// Business domains
pub mod agents;
pub mod chatrooms;
