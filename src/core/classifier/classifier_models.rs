// Classifier domain models - requests, results and the error taxonomy.
//
// Pure data, no vendor wire formats here. The infra layer maps each vendor's
// HTTP responses onto `ClassifierError`.

use std::time::Duration;
use thiserror::Error;

/// Text to score plus the prompt that tells the model how to score it.
#[derive(Debug, Clone)]
pub struct ClassificationRequest {
    pub text: String,
    pub prompt: String,
}

impl ClassificationRequest {
    pub fn new(text: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            prompt: prompt.into(),
        }
    }
}

/// Outcome of a successful classification.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    /// Spam likelihood in [0, 1]
    pub score: f64,
    /// Vendor name (e.g. "openai")
    pub provider: String,
    pub model: String,
    /// Wall time across all attempts, including backoff
    pub latency: Duration,
    /// How many provider calls it took
    pub attempts: u32,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClassifierError {
    /// Bad credentials. Never retried.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Network trouble or a 5xx/429 from the vendor. Eligible for retry.
    #[error("Transient provider failure: {0}")]
    Transient(String),

    /// Local rate limiter had no capacity within the allowed wait.
    #[error("Rate limited: no capacity within {0:?}")]
    RateLimited(Duration),

    /// The model replied but we could not turn the reply into a score.
    #[error("Invalid score: {0}")]
    InvalidScore(String),

    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Classification cancelled")]
    Cancelled,

    #[error("Provider error: {0}")]
    Other(String),
}

/// Coarse error category, cheap to copy into a decision reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierErrorKind {
    Auth,
    Transient,
    RateLimited,
    InvalidScore,
    Cancelled,
    Other,
}

impl ClassifierError {
    pub fn kind(&self) -> ClassifierErrorKind {
        match self {
            ClassifierError::Auth(_) => ClassifierErrorKind::Auth,
            ClassifierError::Transient(_) | ClassifierError::RetriesExhausted { .. } => {
                ClassifierErrorKind::Transient
            }
            ClassifierError::RateLimited(_) => ClassifierErrorKind::RateLimited,
            ClassifierError::InvalidScore(_) => ClassifierErrorKind::InvalidScore,
            ClassifierError::Cancelled => ClassifierErrorKind::Cancelled,
            ClassifierError::Other(_) => ClassifierErrorKind::Other,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ClassifierError::Transient(_))
    }
}

impl std::fmt::Display for ClassifierErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassifierErrorKind::Auth => write!(f, "auth"),
            ClassifierErrorKind::Transient => write!(f, "transient"),
            ClassifierErrorKind::RateLimited => write!(f, "rate limited"),
            ClassifierErrorKind::InvalidScore => write!(f, "invalid score"),
            ClassifierErrorKind::Cancelled => write!(f, "cancelled"),
            ClassifierErrorKind::Other => write!(f, "other"),
        }
    }
}

/// Retry behaviour for transient provider failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total provider calls per classification, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each time after that
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Upper bound for a single provider call
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            call_timeout: Duration::from_secs(15),
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `attempt + 1`, without jitter.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}
