pub mod chat;
pub mod events;
pub mod messages;
pub mod models;
pub mod prompts;
pub mod session;
pub mod suggestions;
