pub mod commands;
pub mod spam_handler;

pub use commands::moderation;
pub use spam_handler::{incoming_message, DiscordActionSink};
