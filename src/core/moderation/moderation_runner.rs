// Moderation runner - start/stop lifecycle around the decision engine.
//
// Each submitted message is decided on its own task so a slow classifier call
// never holds up other users. `stop()` closes intake, lets in-flight work
// finish within a grace period, cancels whatever is left, then releases the
// trust store.

use super::decision_engine::DecisionEngine;
use super::moderation_models::{Decision, DecisionReason, IncomingMessage};
use super::trust_store::TrustStore;
use crate::core::classifier::ClassifierProvider;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Where decisions go once made (the chat transport).
#[async_trait]
pub trait ActionSink: Send + Sync {
    /// Carry out a decision. Failures are the sink's to log.
    async fn apply(&self, message: &IncomingMessage, decision: &Decision);
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunnerError {
    #[error("Moderation runner is not running")]
    NotRunning,

    #[error("Moderation runner has already been stopped")]
    AlreadyStopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Tasks still running when stop was requested
    pub in_flight: usize,
    /// True if the grace period ran out and stragglers were cancelled
    pub forced: bool,
}

enum RunnerState {
    Idle,
    Running { sink: Arc<dyn ActionSink> },
    Stopped,
}

pub struct ModerationRunner<S: TrustStore + 'static, P: ClassifierProvider + 'static> {
    engine: Arc<DecisionEngine<S, P>>,
    state: Mutex<RunnerState>,
    tracker: TaskTracker,
    abort: CancellationToken,
    grace_period: Duration,
}

impl<S: TrustStore + 'static, P: ClassifierProvider + 'static> ModerationRunner<S, P> {
    pub fn new(engine: DecisionEngine<S, P>, grace_period: Duration) -> Self {
        Self {
            engine: Arc::new(engine),
            state: Mutex::new(RunnerState::Idle),
            tracker: TaskTracker::new(),
            abort: CancellationToken::new(),
            grace_period,
        }
    }

    pub fn engine(&self) -> &DecisionEngine<S, P> {
        &self.engine
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lock_state(), RunnerState::Running { .. })
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RunnerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Begin accepting messages. Calling it again while running is a no-op.
    pub fn start(&self, sink: Arc<dyn ActionSink>) -> Result<(), RunnerError> {
        let mut state = self.lock_state();
        match *state {
            RunnerState::Idle => {
                *state = RunnerState::Running { sink };
                tracing::info!("Moderation runner started");
                Ok(())
            }
            RunnerState::Running { .. } => Ok(()),
            RunnerState::Stopped => Err(RunnerError::AlreadyStopped),
        }
    }

    /// Queue a message for a decision. Rejected unless the runner is running.
    pub fn submit(&self, message: IncomingMessage) -> Result<(), RunnerError> {
        // Held until the task is tracked so `stop` can't close the tracker in between
        let state = self.lock_state();
        let sink = match &*state {
            RunnerState::Running { sink } => Arc::clone(sink),
            RunnerState::Idle => return Err(RunnerError::NotRunning),
            RunnerState::Stopped => return Err(RunnerError::AlreadyStopped),
        };

        let engine = Arc::clone(&self.engine);
        let cancel = self.abort.child_token();
        self.tracker.spawn(async move {
            let decision = engine.decide(&message, &cancel).await;
            if decision.reason == DecisionReason::Abandoned {
                tracing::warn!(
                    message_id = message.message_id,
                    user_id = message.user_id,
                    "Decision abandoned during shutdown"
                );
                return;
            }
            sink.apply(&message, &decision).await;
        });
        drop(state);

        Ok(())
    }

    /// Graceful shutdown. Safe to call once after `start`.
    pub async fn stop(&self) -> Result<ShutdownReport, RunnerError> {
        {
            let mut state = self.lock_state();
            match *state {
                RunnerState::Running { .. } => *state = RunnerState::Stopped,
                RunnerState::Idle => return Err(RunnerError::NotRunning),
                RunnerState::Stopped => return Err(RunnerError::AlreadyStopped),
            }
        }

        self.tracker.close();
        let in_flight = self.tracker.len();
        tracing::info!(
            in_flight,
            grace_secs = self.grace_period.as_secs(),
            "Stopping moderation runner"
        );

        let forced = tokio::time::timeout(self.grace_period, self.tracker.wait())
            .await
            .is_err();
        if forced {
            tracing::warn!("Grace period elapsed, cancelling in-flight decisions");
            self.abort.cancel();
            self.tracker.wait().await;
        }

        self.engine.shutdown().await;
        tracing::info!(forced, "Moderation runner stopped");

        Ok(ShutdownReport { in_flight, forced })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::{
        ClassifierError, ClassifierService, RateLimiterConfig, RetryPolicy,
    };
    use crate::core::moderation::{DecisionAction, ModerationConfig, UserKey};
    use crate::infra::moderation::InMemoryTrustStore;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    struct SlowProvider {
        delay: Duration,
        score: f64,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl ClassifierProvider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        fn model(&self) -> &str {
            "slow-1"
        }

        async fn score(&self, _text: &str, _prompt: &str) -> Result<f64, ClassifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(self.score)
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        applied: AsyncMutex<Vec<(i64, DecisionAction)>>,
    }

    #[async_trait]
    impl ActionSink for RecordingSink {
        async fn apply(&self, message: &IncomingMessage, decision: &Decision) {
            self.applied
                .lock()
                .await
                .push((message.message_id, decision.action));
        }
    }

    fn runner(
        delay: Duration,
        score: f64,
        grace: Duration,
    ) -> (ModerationRunner<InMemoryTrustStore, SlowProvider>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let provider = SlowProvider {
            delay,
            score,
            calls: Arc::clone(&calls),
        };
        let retry = RetryPolicy {
            call_timeout: Duration::from_secs(3600),
            ..Default::default()
        };
        let classifier = ClassifierService::new(provider, RateLimiterConfig::unlimited(), retry);
        let config = ModerationConfig {
            prompt: "score it".to_string(),
            ..Default::default()
        };
        let engine = DecisionEngine::new(InMemoryTrustStore::new(), classifier, config);
        (ModerationRunner::new(engine, grace), calls)
    }

    fn message(message_id: i64, user_id: i64) -> IncomingMessage {
        IncomingMessage {
            message_id,
            user_id,
            channel_id: 1,
            guild_id: None,
            text: "hello".to_string(),
        }
    }

    #[tokio::test]
    async fn test_submit_requires_start() {
        let (runner, _) = runner(Duration::ZERO, 0.0, Duration::from_secs(1));
        assert_eq!(runner.submit(message(1, 1)), Err(RunnerError::NotRunning));
        assert_eq!(runner.stop().await, Err(RunnerError::NotRunning));
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_is_once() {
        let (runner, _) = runner(Duration::ZERO, 0.0, Duration::from_secs(1));
        let sink = Arc::new(RecordingSink::default());

        runner.start(sink.clone()).unwrap();
        runner.start(sink.clone()).unwrap();
        assert!(runner.is_running());

        runner.stop().await.unwrap();
        assert_eq!(runner.stop().await, Err(RunnerError::AlreadyStopped));
        assert_eq!(runner.start(sink), Err(RunnerError::AlreadyStopped));
        assert_eq!(runner.submit(message(1, 1)), Err(RunnerError::AlreadyStopped));
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_decisions_finish_within_grace() {
        let (runner, _) = runner(Duration::from_secs(2), 0.9, Duration::from_secs(10));
        let sink = Arc::new(RecordingSink::default());
        runner.start(sink.clone()).unwrap();

        for id in 0..3 {
            runner.submit(message(id, 100 + id)).unwrap();
        }

        let report = runner.stop().await.unwrap();

        assert!(!report.forced);
        let mut applied = sink.applied.lock().await.clone();
        applied.sort_by_key(|(id, _)| *id);
        assert_eq!(
            applied,
            vec![
                (0, DecisionAction::Flag),
                (1, DecisionAction::Flag),
                (2, DecisionAction::Flag)
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_every_accepted_submit_is_drained_by_stop() {
        let (runner, _) = runner(Duration::from_millis(1), 0.0, Duration::from_secs(30));
        let runner = Arc::new(runner);
        let sink = Arc::new(RecordingSink::default());
        runner.start(sink.clone()).unwrap();

        let submitter = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move {
                let mut accepted = 0usize;
                for id in 0.. {
                    match runner.submit(message(id, id)) {
                        Ok(()) => accepted += 1,
                        Err(RunnerError::AlreadyStopped) => break,
                        Err(other) => panic!("unexpected {:?}", other),
                    }
                    tokio::task::yield_now().await;
                }
                accepted
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        let report = runner.stop().await.unwrap();
        let accepted = submitter.await.unwrap();

        assert!(!report.forced);
        assert!(accepted > 0);
        // Nothing accepted slips past the drain
        assert_eq!(sink.applied.lock().await.len(), accepted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stragglers_are_cancelled_after_grace() {
        let (runner, calls) = runner(Duration::from_secs(600), 0.9, Duration::from_secs(1));
        let sink = Arc::new(RecordingSink::default());
        runner.start(sink.clone()).unwrap();

        runner.submit(message(1, 1)).unwrap();
        // Let the task reach the classifier call
        tokio::time::sleep(Duration::from_millis(10)).await;

        let report = runner.stop().await.unwrap();

        assert!(report.forced);
        assert_eq!(report.in_flight, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Abandoned decisions are not acted on
        assert!(sink.applied.lock().await.is_empty());
        // The count increment made before cancellation is kept
        let record = runner
            .engine()
            .user_record(&UserKey::global(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.interaction_count, 1);
    }
}
