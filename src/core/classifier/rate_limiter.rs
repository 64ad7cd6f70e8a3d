// Token bucket limiting outbound classifier calls.
//
// Each provider instance owns one bucket. Callers wait for a token up to
// `max_wait`; past that they get `ClassifierError::RateLimited`. The lock is
// only held while doing arithmetic, never across an await.

use super::classifier_models::ClassifierError;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// Float slack so a bucket refilled to 0.9999999 still counts as one token.
const TOKEN_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Tokens added per second. Zero or negative disables limiting.
    pub rate_per_sec: f64,
    /// Bucket capacity (and the initial fill)
    pub burst: u32,
    /// Longest a caller will wait for a token
    pub max_wait: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            rate_per_sec: 2.0,
            burst: 5,
            max_wait: Duration::from_secs(5),
        }
    }
}

impl RateLimiterConfig {
    pub fn unlimited() -> Self {
        Self {
            rate_per_sec: 0.0,
            burst: 0,
            max_wait: Duration::ZERO,
        }
    }

    fn is_unlimited(&self) -> bool {
        self.rate_per_sec <= 0.0
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct TokenBucket {
    config: RateLimiterConfig,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(config: RateLimiterConfig) -> Self {
        let burst = config.burst.max(1) as f64;
        Self {
            state: Mutex::new(BucketState {
                tokens: burst,
                last_refill: Instant::now(),
            }),
            config,
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Take one token, or report how long until one becomes available.
    fn try_take(&self) -> Result<(), Duration> {
        let capacity = self.config.burst.max(1) as f64;
        let rate = self.config.rate_per_sec;

        // Never held across an await
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill);
        state.tokens = (state.tokens + elapsed.as_secs_f64() * rate).min(capacity);
        state.last_refill = now;

        if state.tokens + TOKEN_EPSILON >= 1.0 {
            state.tokens = (state.tokens - 1.0).max(0.0);
            Ok(())
        } else {
            let missing = 1.0 - state.tokens;
            // Absurdly slow rates overflow Duration; treat as "never"
            Err(Duration::try_from_secs_f64(missing / rate).unwrap_or(Duration::MAX))
        }
    }

    /// Wait for a token.
    ///
    /// Returns `RateLimited` when no token shows up within `max_wait`, and
    /// `Cancelled` when the token is cancelled while waiting.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), ClassifierError> {
        if self.config.is_unlimited() {
            return Ok(());
        }

        let started = Instant::now();
        loop {
            let wait = match self.try_take() {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };

            let waited = started.elapsed();
            let too_long = waited
                .checked_add(wait)
                .map_or(true, |total| total > self.config.max_wait);
            if too_long {
                tracing::warn!(
                    waited_ms = waited.as_millis() as u64,
                    needed_ms = wait.as_millis() as u64,
                    "Classifier rate limit exceeded"
                );
                return Err(ClassifierError::RateLimited(self.config.max_wait));
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(ClassifierError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}
