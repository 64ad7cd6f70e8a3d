// Moderation domain models - data structures for the decision engine.
//
// These are pure domain types with no Discord dependencies.
// The Discord layer converts messages into `IncomingMessage` and turns a
// `Decision` back into Discord actions.

use crate::core::classifier::{ClassificationResult, ClassifierErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A chat message as seen by the engine.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub message_id: i64,
    pub user_id: i64,
    pub channel_id: i64,
    pub guild_id: Option<i64>,
    pub text: String,
}

/// Identity of a trust record: a user, optionally scoped to one channel.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct UserKey {
    pub user_id: i64,
    pub channel_id: Option<i64>,
}

impl UserKey {
    pub fn global(user_id: i64) -> Self {
        Self {
            user_id,
            channel_id: None,
        }
    }

    pub fn in_channel(user_id: i64, channel_id: i64) -> Self {
        Self {
            user_id,
            channel_id: Some(channel_id),
        }
    }
}

/// Renders the store key: `user:<id>` or `user:<id>:channel:<id>`.
impl std::fmt::Display for UserKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.channel_id {
            Some(channel_id) => write!(f, "user:{}:channel:{}", self.user_id, channel_id),
            None => write!(f, "user:{}", self.user_id),
        }
    }
}

/// Persistent trust state for one `UserKey`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub key: UserKey,
    /// Messages observed so far. Only ever goes up.
    pub interaction_count: u64,
    pub last_seen: DateTime<Utc>,
    /// `Some(false)` once a message from this user was flagged
    pub trusted: Option<bool>,
}

/// Whether "new user" is tracked across the whole platform or per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserScope {
    #[default]
    Global,
    PerChannel,
}

impl UserScope {
    pub fn key_for(&self, user_id: i64, channel_id: Option<i64>) -> UserKey {
        match (self, channel_id) {
            (UserScope::PerChannel, Some(channel_id)) => UserKey::in_channel(user_id, channel_id),
            _ => UserKey::global(user_id),
        }
    }
}

/// Who gets sent to the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClassifyPolicy {
    /// Only users whose count is at or below `new_user_threshold`
    #[default]
    NewUsersOnly,
    AllUsers,
}

impl ClassifyPolicy {
    pub fn should_classify(&self, interaction_count: u64, new_user_threshold: u64) -> bool {
        match self {
            ClassifyPolicy::NewUsersOnly => interaction_count <= new_user_threshold,
            ClassifyPolicy::AllUsers => true,
        }
    }
}

/// What to do with a message when a dependency fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Let the message through
    #[default]
    FailOpen,
    /// Treat the message as spam
    FailClosed,
}

impl FailurePolicy {
    pub fn action(&self) -> DecisionAction {
        match self {
            FailurePolicy::FailOpen => DecisionAction::Allow,
            FailurePolicy::FailClosed => DecisionAction::Flag,
        }
    }
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailurePolicy::FailOpen => write!(f, "fail-open"),
            FailurePolicy::FailClosed => write!(f, "fail-closed"),
        }
    }
}

/// Channels exempt from classification. Fixed for the process lifetime.
#[derive(Debug, Clone, Default)]
pub struct ChannelPolicy {
    whitelist: HashSet<i64>,
}

impl ChannelPolicy {
    pub fn new(whitelist: impl IntoIterator<Item = i64>) -> Self {
        Self {
            whitelist: whitelist.into_iter().collect(),
        }
    }

    pub fn is_whitelisted(&self, channel_id: i64) -> bool {
        self.whitelist.contains(&channel_id)
    }

    pub fn len(&self) -> usize {
        self.whitelist.len()
    }

    pub fn is_empty(&self) -> bool {
        self.whitelist.is_empty()
    }

    /// Whitelisted channel IDs in ascending order.
    pub fn channels(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.whitelist.iter().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// Policy knobs consumed by the decision engine.
#[derive(Debug, Clone)]
pub struct ModerationConfig {
    /// Prompt template sent alongside every message
    pub prompt: String,
    /// Scores at or above this are flagged
    pub spam_threshold: f64,
    /// Scores at or above this are suppressed instead of flagged
    pub suppress_threshold: Option<f64>,
    pub new_user_threshold: u64,
    pub classify_policy: ClassifyPolicy,
    pub user_scope: UserScope,
    pub channel_policy: ChannelPolicy,
    pub classifier_failure_policy: FailurePolicy,
    pub store_failure_policy: FailurePolicy,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            spam_threshold: 0.5,
            suppress_threshold: None,
            new_user_threshold: 1,
            classify_policy: ClassifyPolicy::default(),
            user_scope: UserScope::default(),
            channel_policy: ChannelPolicy::default(),
            classifier_failure_policy: FailurePolicy::default(),
            store_failure_policy: FailurePolicy::default(),
        }
    }
}

/// Action the transport should take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionAction {
    Allow,
    /// Message is spam
    Flag,
    /// Message is spam with high confidence; remove it and mute the author
    Suppress,
}

impl std::fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionAction::Allow => write!(f, "allow"),
            DecisionAction::Flag => write!(f, "flag"),
            DecisionAction::Suppress => write!(f, "suppress"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecisionReason {
    Whitelisted,
    EstablishedUser,
    BelowThreshold,
    SpamThresholdExceeded,
    SuppressThresholdExceeded,
    ClassifierFailed {
        kind: ClassifierErrorKind,
        policy: FailurePolicy,
    },
    StoreUnavailable {
        policy: FailurePolicy,
    },
    /// Shutdown cut the decision short
    Abandoned,
}

impl std::fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionReason::Whitelisted => write!(f, "whitelisted"),
            DecisionReason::EstablishedUser => write!(f, "established user"),
            DecisionReason::BelowThreshold => write!(f, "below spam threshold"),
            DecisionReason::SpamThresholdExceeded => write!(f, "spam threshold exceeded"),
            DecisionReason::SuppressThresholdExceeded => write!(f, "suppress threshold exceeded"),
            DecisionReason::ClassifierFailed { kind, policy } => {
                write!(f, "classifier error ({}) - {}", kind, policy)
            }
            DecisionReason::StoreUnavailable { policy } => {
                write!(f, "trust store unavailable - {}", policy)
            }
            DecisionReason::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// The engine's verdict for one message.
#[derive(Debug, Clone)]
pub struct Decision {
    pub action: DecisionAction,
    pub reason: DecisionReason,
    /// Interaction count after this message, when the store was reached
    pub interaction_count: Option<u64>,
    pub classification: Option<ClassificationResult>,
}

impl Decision {
    pub fn new(action: DecisionAction, reason: DecisionReason) -> Self {
        Self {
            action,
            reason,
            interaction_count: None,
            classification: None,
        }
    }

    pub fn allow(reason: DecisionReason) -> Self {
        Self::new(DecisionAction::Allow, reason)
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.interaction_count = Some(count);
        self
    }

    pub fn with_classification(mut self, result: ClassificationResult) -> Self {
        self.classification = Some(result);
        self
    }

    pub fn score(&self) -> Option<f64> {
        self.classification.as_ref().map(|c| c.score)
    }
}
