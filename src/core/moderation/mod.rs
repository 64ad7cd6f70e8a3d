// Core moderation module - trust-aware spam decisions.
// Following the same pattern as the classifier module.

pub mod decision_engine;
pub mod history_importer;
pub mod moderation_models;
pub mod moderation_runner;
pub mod trust_store;

pub use decision_engine::*;
pub use moderation_models::*;
pub use moderation_runner::*;
pub use trust_store::*;
