// Decision engine - core business logic for trust-aware spam moderation.
//
// For each message:
// - whitelisted channels short-circuit to Allow
// - the author's interaction count is bumped atomically in the trust store
// - new users (or everyone, depending on policy) are sent to the classifier
// - the score is compared against the spam / suppress thresholds
//
// Every failure on the way is turned into a Decision. Nothing here panics or
// propagates per-message errors upward.
//
// NO Discord dependencies here - just pure domain logic.

use super::moderation_models::{
    Decision, DecisionAction, DecisionReason, IncomingMessage, ModerationConfig, UserKey,
    UserRecord,
};
use super::trust_store::{TrustStore, TrustStoreError};
use crate::core::classifier::{
    ClassificationRequest, ClassificationResult, ClassifierError, ClassifierProvider,
    ClassifierService,
};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

// ============================================================================
// STATS
// ============================================================================

/// Running totals, readable while the engine is live.
#[derive(Debug, Default)]
pub struct EngineStats {
    allowed: AtomicU64,
    flagged: AtomicU64,
    suppressed: AtomicU64,
    whitelisted: AtomicU64,
    classifier_calls: AtomicU64,
    classifier_failures: AtomicU64,
    store_failures: AtomicU64,
    abandoned: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStatsSnapshot {
    pub allowed: u64,
    pub flagged: u64,
    pub suppressed: u64,
    pub whitelisted: u64,
    pub classifier_calls: u64,
    pub classifier_failures: u64,
    pub store_failures: u64,
    pub abandoned: u64,
}

impl EngineStats {
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            allowed: self.allowed.load(Ordering::Relaxed),
            flagged: self.flagged.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            whitelisted: self.whitelisted.load(Ordering::Relaxed),
            classifier_calls: self.classifier_calls.load(Ordering::Relaxed),
            classifier_failures: self.classifier_failures.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }

    fn record(&self, decision: &Decision) {
        let counter = match decision.action {
            DecisionAction::Allow => &self.allowed,
            DecisionAction::Flag => &self.flagged,
            DecisionAction::Suppress => &self.suppressed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

// ============================================================================
// CORE SERVICE
// ============================================================================

pub struct DecisionEngine<S: TrustStore, P: ClassifierProvider> {
    store: S,
    classifier: ClassifierService<P>,
    config: ModerationConfig,
    stats: EngineStats,
}

impl<S: TrustStore, P: ClassifierProvider> DecisionEngine<S, P> {
    /// Create a new engine with the given store, classifier and policy.
    pub fn new(store: S, classifier: ClassifierService<P>, config: ModerationConfig) -> Self {
        Self {
            store,
            classifier,
            config,
            stats: EngineStats::default(),
        }
    }

    pub fn config(&self) -> &ModerationConfig {
        &self.config
    }

    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn classifier(&self) -> &ClassifierService<P> {
        &self.classifier
    }

    /// Look up a user's trust record (admin views).
    pub async fn user_record(&self, key: &UserKey) -> Result<Option<UserRecord>, TrustStoreError> {
        self.store.get_user_record(key).await
    }

    /// Decide what to do with a message.
    ///
    /// `cancel` is threaded into every blocking call. When it fires the
    /// message is given up with reason `Abandoned`.
    pub async fn decide(&self, message: &IncomingMessage, cancel: &CancellationToken) -> Decision {
        let decision = self.evaluate(message, cancel).await;
        self.stats.record(&decision);

        match decision.action {
            DecisionAction::Allow => tracing::debug!(
                user_id = message.user_id,
                channel_id = message.channel_id,
                reason = %decision.reason,
                score = decision.score(),
                count = decision.interaction_count,
                "Message allowed"
            ),
            _ => tracing::info!(
                user_id = message.user_id,
                channel_id = message.channel_id,
                message_id = message.message_id,
                action = %decision.action,
                reason = %decision.reason,
                score = decision.score(),
                count = decision.interaction_count,
                "Message flagged as spam"
            ),
        }

        decision
    }

    async fn evaluate(&self, message: &IncomingMessage, cancel: &CancellationToken) -> Decision {
        // Whitelisted channels never touch the store or the classifier
        if self.config.channel_policy.is_whitelisted(message.channel_id) {
            self.stats.whitelisted.fetch_add(1, Ordering::Relaxed);
            return Decision::allow(DecisionReason::Whitelisted);
        }

        let key = self
            .config
            .user_scope
            .key_for(message.user_id, Some(message.channel_id));

        let increment = tokio::select! {
            biased;
            _ = cancel.cancelled() => return self.abandoned(),
            result = self.store.increment_user_count(&key) => result,
        };

        let count = match increment {
            Ok(count) => count,
            Err(e) => return self.store_failure(&key, e),
        };

        if !self
            .config
            .classify_policy
            .should_classify(count, self.config.new_user_threshold)
        {
            return Decision::allow(DecisionReason::EstablishedUser).with_count(count);
        }

        let request = ClassificationRequest::new(message.text.as_str(), self.config.prompt.as_str());
        self.stats.classifier_calls.fetch_add(1, Ordering::Relaxed);

        match self.classifier.classify(&request, cancel).await {
            Ok(result) => self.apply_thresholds(&key, count, result).await,
            Err(ClassifierError::Cancelled) => self.abandoned().with_count(count),
            Err(e) => self.classifier_failure(&key, count, e),
        }
    }

    async fn apply_thresholds(
        &self,
        key: &UserKey,
        count: u64,
        result: ClassificationResult,
    ) -> Decision {
        let score = result.score;

        let (action, reason) = match self.config.suppress_threshold {
            Some(suppress) if score >= suppress => (
                DecisionAction::Suppress,
                DecisionReason::SuppressThresholdExceeded,
            ),
            _ if score >= self.config.spam_threshold => {
                (DecisionAction::Flag, DecisionReason::SpamThresholdExceeded)
            }
            _ => (DecisionAction::Allow, DecisionReason::BelowThreshold),
        };

        if action != DecisionAction::Allow {
            // The flag is informational; losing it does not change the decision
            if let Err(e) = self.store.set_trust_flag(key, false).await {
                tracing::warn!(key = %key, error = %e, "Failed to cache trust flag");
            }
        }

        Decision::new(action, reason)
            .with_count(count)
            .with_classification(result)
    }

    fn classifier_failure(&self, key: &UserKey, count: u64, error: ClassifierError) -> Decision {
        let policy = self.config.classifier_failure_policy;
        self.stats.classifier_failures.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            key = %key,
            provider = self.classifier.provider_name(),
            error = %error,
            policy = %policy,
            "Classification failed, applying failure policy"
        );

        Decision::new(
            policy.action(),
            DecisionReason::ClassifierFailed {
                kind: error.kind(),
                policy,
            },
        )
        .with_count(count)
    }

    fn store_failure(&self, key: &UserKey, error: TrustStoreError) -> Decision {
        let policy = self.config.store_failure_policy;
        self.stats.store_failures.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            key = %key,
            error = %error,
            policy = %policy,
            "Trust store failed, applying failure policy"
        );

        Decision::new(policy.action(), DecisionReason::StoreUnavailable { policy })
    }

    fn abandoned(&self) -> Decision {
        self.stats.abandoned.fetch_add(1, Ordering::Relaxed);
        Decision::allow(DecisionReason::Abandoned)
    }

    /// Release the store. Called by the runner after in-flight work drains.
    pub async fn shutdown(&self) {
        self.store.close().await;
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::{ClassifierErrorKind, RateLimiterConfig, RetryPolicy};
    use crate::core::moderation::{ChannelPolicy, ClassifyPolicy, FailurePolicy, UserScope};
    use async_trait::async_trait;
    use chrono::Utc;
    use dashmap::DashMap;
    use std::sync::atomic::{AtomicBool, AtomicU32};
    use std::sync::Arc;
    use std::time::Duration;

    /// In-memory store for testing
    #[derive(Default)]
    struct MockTrustStore {
        records: DashMap<UserKey, UserRecord>,
        offline: AtomicBool,
        increments: AtomicU32,
    }

    impl MockTrustStore {
        fn check_online(&self) -> Result<(), TrustStoreError> {
            if self.offline.load(Ordering::SeqCst) {
                Err(TrustStoreError::Unavailable("connection refused".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl TrustStore for Arc<MockTrustStore> {
        async fn get_user_count(&self, key: &UserKey) -> Result<u64, TrustStoreError> {
            self.check_online()?;
            Ok(self
                .records
                .get(key)
                .map(|r| r.interaction_count)
                .unwrap_or(0))
        }

        async fn increment_user_count_by(
            &self,
            key: &UserKey,
            amount: u64,
        ) -> Result<u64, TrustStoreError> {
            self.check_online()?;
            self.increments.fetch_add(1, Ordering::SeqCst);
            let mut record = self.records.entry(*key).or_insert_with(|| UserRecord {
                key: *key,
                interaction_count: 0,
                last_seen: Utc::now(),
                trusted: None,
            });
            record.interaction_count += amount;
            record.last_seen = Utc::now();
            Ok(record.interaction_count)
        }

        async fn get_user_record(
            &self,
            key: &UserKey,
        ) -> Result<Option<UserRecord>, TrustStoreError> {
            self.check_online()?;
            Ok(self.records.get(key).map(|r| r.clone()))
        }

        async fn set_trust_flag(&self, key: &UserKey, trusted: bool) -> Result<(), TrustStoreError> {
            self.check_online()?;
            if let Some(mut record) = self.records.get_mut(key) {
                record.trusted = Some(trusted);
            }
            Ok(())
        }

        async fn is_empty(&self) -> Result<bool, TrustStoreError> {
            self.check_online()?;
            Ok(self.records.is_empty())
        }
    }

    /// Classifier stub returning a fixed outcome and counting calls.
    struct StubProvider {
        outcome: Result<f64, ClassifierError>,
        calls: Arc<AtomicU32>,
        delay: Duration,
    }

    #[async_trait]
    impl ClassifierProvider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        fn model(&self) -> &str {
            "stub-1"
        }

        async fn score(&self, _text: &str, _prompt: &str) -> Result<f64, ClassifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.outcome.clone()
        }
    }

    struct Harness {
        engine: DecisionEngine<Arc<MockTrustStore>, StubProvider>,
        store: Arc<MockTrustStore>,
        calls: Arc<AtomicU32>,
    }

    fn harness(outcome: Result<f64, ClassifierError>, config: ModerationConfig) -> Harness {
        harness_with_delay(outcome, config, Duration::ZERO)
    }

    fn harness_with_delay(
        outcome: Result<f64, ClassifierError>,
        config: ModerationConfig,
        delay: Duration,
    ) -> Harness {
        let store = Arc::new(MockTrustStore::default());
        let calls = Arc::new(AtomicU32::new(0));
        let provider = StubProvider {
            outcome,
            calls: Arc::clone(&calls),
            delay,
        };
        let retry = RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
            call_timeout: Duration::from_secs(60),
        };
        let classifier = ClassifierService::new(provider, RateLimiterConfig::unlimited(), retry);
        Harness {
            engine: DecisionEngine::new(Arc::clone(&store), classifier, config),
            store,
            calls,
        }
    }

    fn config() -> ModerationConfig {
        ModerationConfig {
            prompt: "Rate how likely this is spam, 0 to 1.".to_string(),
            spam_threshold: 0.5,
            new_user_threshold: 1,
            ..Default::default()
        }
    }

    fn message(user_id: i64, channel_id: i64, text: &str) -> IncomingMessage {
        IncomingMessage {
            message_id: 1,
            user_id,
            channel_id,
            guild_id: Some(1),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_whitelisted_channel_skips_everything() {
        let config = ModerationConfig {
            channel_policy: ChannelPolicy::new([77]),
            ..config()
        };
        let h = harness(Ok(1.0), config);
        let cancel = CancellationToken::new();

        for _ in 0..5 {
            let decision = h.engine.decide(&message(1, 77, "spam spam"), &cancel).await;
            assert_eq!(decision.action, DecisionAction::Allow);
            assert_eq!(decision.reason, DecisionReason::Whitelisted);
            assert_eq!(decision.reason.to_string(), "whitelisted");
        }

        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.store.increments.load(Ordering::SeqCst), 0);
        assert_eq!(h.engine.stats().whitelisted, 5);
    }

    #[tokio::test]
    async fn test_first_message_classified_then_established() {
        let h = harness(Ok(0.1), config());
        let cancel = CancellationToken::new();

        let first = h.engine.decide(&message(5, 10, "hi all"), &cancel).await;
        assert_eq!(first.action, DecisionAction::Allow);
        assert_eq!(first.reason, DecisionReason::BelowThreshold);
        assert_eq!(first.interaction_count, Some(1));
        assert_eq!(first.score(), Some(0.1));

        let second = h.engine.decide(&message(5, 10, "hello again"), &cancel).await;
        assert_eq!(second.action, DecisionAction::Allow);
        assert_eq!(second.reason, DecisionReason::EstablishedUser);
        assert_eq!(second.interaction_count, Some(2));
        assert!(second.classification.is_none());

        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_score_equal_to_threshold_is_flagged() {
        let h = harness(Ok(0.5), config());

        let decision = h
            .engine
            .decide(&message(5, 10, "limited offer"), &CancellationToken::new())
            .await;

        assert_eq!(decision.action, DecisionAction::Flag);
        assert_eq!(decision.reason, DecisionReason::SpamThresholdExceeded);
        assert_eq!(decision.score(), Some(0.5));

        let record = h.store.records.get(&UserKey::global(5)).unwrap();
        assert_eq!(record.trusted, Some(false));
    }

    #[tokio::test]
    async fn test_suppress_threshold_wins_over_flag() {
        let config = ModerationConfig {
            suppress_threshold: Some(0.9),
            ..config()
        };
        let h = harness(Ok(0.95), config);

        let decision = h
            .engine
            .decide(&message(5, 10, "crypto giveaway"), &CancellationToken::new())
            .await;

        assert_eq!(decision.action, DecisionAction::Suppress);
        assert_eq!(decision.reason, DecisionReason::SuppressThresholdExceeded);
    }

    #[tokio::test]
    async fn test_empty_text_counts_and_is_classified() {
        let h = harness(Ok(0.0), config());

        let decision = h
            .engine
            .decide(&message(5, 10, ""), &CancellationToken::new())
            .await;

        assert_eq!(decision.interaction_count, Some(1));
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_threshold_zero_classifies_nobody() {
        let config = ModerationConfig {
            new_user_threshold: 0,
            ..config()
        };
        let h = harness(Ok(1.0), config);

        let decision = h
            .engine
            .decide(&message(5, 10, "spam"), &CancellationToken::new())
            .await;

        assert_eq!(decision.reason, DecisionReason::EstablishedUser);
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_all_users_policy_classifies_established_users() {
        let config = ModerationConfig {
            classify_policy: ClassifyPolicy::AllUsers,
            ..config()
        };
        let h = harness(Ok(0.2), config);
        let cancel = CancellationToken::new();

        for _ in 0..4 {
            h.engine.decide(&message(5, 10, "hey"), &cancel).await;
        }

        assert_eq!(h.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_per_channel_scope_counts_separately() {
        let config = ModerationConfig {
            user_scope: UserScope::PerChannel,
            ..config()
        };
        let h = harness(Ok(0.1), config);
        let cancel = CancellationToken::new();

        h.engine.decide(&message(5, 10, "a"), &cancel).await;
        let other_channel = h.engine.decide(&message(5, 11, "b"), &cancel).await;

        // New in channel 11 even though known in channel 10
        assert_eq!(other_channel.interaction_count, Some(1));
        assert_eq!(other_channel.reason, DecisionReason::BelowThreshold);
        assert_eq!(h.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_classifier_failure_fails_open_once() {
        let h = harness(Err(ClassifierError::Transient("502".into())), config());

        let decision = h
            .engine
            .decide(&message(5, 10, "hello"), &CancellationToken::new())
            .await;

        assert_eq!(decision.action, DecisionAction::Allow);
        assert_eq!(
            decision.reason,
            DecisionReason::ClassifierFailed {
                kind: ClassifierErrorKind::Transient,
                policy: FailurePolicy::FailOpen,
            }
        );
        // Retry budget of 3 consumed, failure surfaced once
        assert_eq!(h.calls.load(Ordering::SeqCst), 3);
        assert_eq!(h.engine.stats().classifier_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_classifier_failure_fail_closed_flags() {
        let config = ModerationConfig {
            classifier_failure_policy: FailurePolicy::FailClosed,
            ..config()
        };
        let h = harness(Err(ClassifierError::Auth("bad key".into())), config);

        let decision = h
            .engine
            .decide(&message(5, 10, "hello"), &CancellationToken::new())
            .await;

        assert_eq!(decision.action, DecisionAction::Flag);
        assert_eq!(
            decision.reason,
            DecisionReason::ClassifierFailed {
                kind: ClassifierErrorKind::Auth,
                policy: FailurePolicy::FailClosed,
            }
        );
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_store_outage_applies_store_policy() {
        let config = ModerationConfig {
            store_failure_policy: FailurePolicy::FailClosed,
            ..config()
        };
        let h = harness(Ok(0.0), config);
        h.store.offline.store(true, Ordering::SeqCst);

        let decision = h
            .engine
            .decide(&message(5, 10, "hello"), &CancellationToken::new())
            .await;

        assert_eq!(decision.action, DecisionAction::Flag);
        assert_eq!(
            decision.reason,
            DecisionReason::StoreUnavailable {
                policy: FailurePolicy::FailClosed
            }
        );
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.engine.stats().store_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_classification_abandons() {
        let h = harness_with_delay(Ok(0.9), config(), Duration::from_secs(30));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let decision = h.engine.decide(&message(5, 10, "hello"), &cancel).await;

        assert_eq!(decision.action, DecisionAction::Allow);
        assert_eq!(decision.reason, DecisionReason::Abandoned);
        // The count increment already happened and stays
        assert_eq!(decision.interaction_count, Some(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_messages_from_one_user_count_exactly() {
        let h = harness(Ok(0.0), config());
        let engine = Arc::new(h.engine);
        let cancel = CancellationToken::new();

        let mut tasks = Vec::new();
        for i in 0..64 {
            let engine = Arc::clone(&engine);
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                engine
                    .decide(&message(9, 10, &format!("msg {}", i)), &cancel)
                    .await
            }));
        }

        let mut counts = Vec::new();
        for task in tasks {
            counts.push(task.await.unwrap().interaction_count.unwrap());
        }
        counts.sort_unstable();

        // Every message saw a distinct count 1..=64
        assert_eq!(counts, (1..=64).collect::<Vec<u64>>());
        let record = h.store.records.get(&UserKey::global(9)).unwrap();
        assert_eq!(record.interaction_count, 64);
        // Only the first message was a "new user" message
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    }
}
