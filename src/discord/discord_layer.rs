// Discord layer - commands and event handlers.

#[path = "moderation/mod.rs"]
pub mod moderation;

use crate::core::classifier::ClassifierProvider;
use crate::core::moderation::{ModerationRunner, TrustStore};
use std::sync::Arc;

/// The runner as wired in production: backend and vendor chosen at startup.
pub type BotRunner = ModerationRunner<Box<dyn TrustStore>, Box<dyn ClassifierProvider>>;

/// Shared state available to every command and event handler.
pub struct Data {
    pub moderation: Arc<BotRunner>,
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
