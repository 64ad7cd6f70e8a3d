use super::classifier_models::{
    ClassificationRequest, ClassificationResult, ClassifierError, RetryPolicy,
};
use super::rate_limiter::{RateLimiterConfig, TokenBucket};
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait ClassifierProvider: Send + Sync {
    /// Vendor name used in logs and results.
    fn name(&self) -> &str;

    /// Model identifier sent to the vendor.
    fn model(&self) -> &str;

    /// One raw scoring call. No retries, no rate limiting.
    ///
    /// Returns the spam likelihood reported by the model. Range checking is
    /// done by `ClassifierService`.
    async fn score(&self, text: &str, prompt: &str) -> Result<f64, ClassifierError>;
}

// Blanket implementation for Box<dyn ClassifierProvider>
// so the vendor can be picked at startup while the engine stays generic.
#[async_trait]
impl ClassifierProvider for Box<dyn ClassifierProvider> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn model(&self) -> &str {
        (**self).model()
    }

    async fn score(&self, text: &str, prompt: &str) -> Result<f64, ClassifierError> {
        (**self).score(text, prompt).await
    }
}

/// Wraps one provider instance with its own rate limiter and retry policy.
pub struct ClassifierService<P: ClassifierProvider> {
    provider: P,
    limiter: TokenBucket,
    retry: RetryPolicy,
}

impl<P: ClassifierProvider> ClassifierService<P> {
    pub fn new(provider: P, rate_limit: RateLimiterConfig, retry: RetryPolicy) -> Self {
        Self {
            provider,
            limiter: TokenBucket::new(rate_limit),
            retry,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn rate_limit(&self) -> &RateLimiterConfig {
        self.limiter.config()
    }

    /// Score a message.
    ///
    /// Every attempt takes a rate limiter token first. Transient failures
    /// (including per-call timeouts) are retried with exponential backoff
    /// until `max_attempts` is reached; everything else is returned at once.
    pub async fn classify(
        &self,
        request: &ClassificationRequest,
        cancel: &CancellationToken,
    ) -> Result<ClassificationResult, ClassifierError> {
        let started = Instant::now();
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.limiter.acquire(cancel).await?;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ClassifierError::Cancelled),
                outcome = tokio::time::timeout(
                    self.retry.call_timeout,
                    self.provider.score(&request.text, &request.prompt),
                ) => outcome,
            };

            let error = match outcome {
                Ok(Ok(score)) => {
                    let score = validate_score(score)?;
                    return Ok(ClassificationResult {
                        score,
                        provider: self.provider.name().to_string(),
                        model: self.provider.model().to_string(),
                        latency: started.elapsed(),
                        attempts: attempt,
                    });
                }
                Ok(Err(e)) => e,
                Err(_) => ClassifierError::Transient(format!(
                    "call timed out after {:?}",
                    self.retry.call_timeout
                )),
            };

            if !error.is_retryable() {
                tracing::error!(
                    provider = self.provider.name(),
                    attempt,
                    error = %error,
                    "Classifier call failed"
                );
                return Err(error);
            }

            if attempt >= max_attempts {
                tracing::error!(
                    provider = self.provider.name(),
                    attempts = attempt,
                    error = %error,
                    "Classifier retries exhausted"
                );
                return Err(ClassifierError::RetriesExhausted {
                    attempts: attempt,
                    last_error: error.to_string(),
                });
            }

            let delay = self.backoff_with_jitter(attempt);
            tracing::warn!(
                provider = self.provider.name(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient classifier failure, retrying"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(ClassifierError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn backoff_with_jitter(&self, attempt: u32) -> Duration {
        let base = self.retry.backoff_for(attempt);
        let jitter_cap = (base.as_millis() as u64) / 4;
        if jitter_cap == 0 {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0..=jitter_cap);
        base + Duration::from_millis(jitter)
    }
}

fn validate_score(score: f64) -> Result<f64, ClassifierError> {
    if score.is_finite() && (0.0..=1.0).contains(&score) {
        Ok(score)
    } else {
        Err(ClassifierError::InvalidScore(format!(
            "score {} is outside [0, 1]",
            score
        )))
    }
}

/// Turn a model reply into a score.
///
/// Accepts a bare number (`0.87`), a JSON object with a `score`,
/// `spam_score` or `probability` field, or falls back to the first number
/// found in the text (`"Score: 0.9"`).
pub fn parse_score(content: &str) -> Result<f64, ClassifierError> {
    let trimmed = content.trim();

    if let Ok(value) = trimmed.parse::<f64>() {
        return validate_score(value);
    }

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        for field in ["score", "spam_score", "probability"] {
            if let Some(value) = json.get(field).and_then(|v| v.as_f64()) {
                return validate_score(value);
            }
        }
    }

    // Replies that restate the scale ("0 to 1, this is 0.9") end with the verdict
    last_number(trimmed)
        .ok_or_else(|| ClassifierError::InvalidScore(format!("no score in reply: {:?}", trimmed)))
        .and_then(validate_score)
}

/// Last signed decimal in `text`. A '-' only counts as a sign when it does
/// not follow a word or digit, so "0-1" reads as two numbers.
fn last_number(text: &str) -> Option<f64> {
    let bytes = text.as_bytes();
    let mut last = None;
    let mut i = 0;
    while i < bytes.len() {
        let signed = bytes[i] == b'-'
            && bytes.get(i + 1).map_or(false, u8::is_ascii_digit)
            && (i == 0 || !bytes[i - 1].is_ascii_alphanumeric());
        if !signed && !bytes[i].is_ascii_digit() {
            i += 1;
            continue;
        }

        let start = i;
        i += 1;
        while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
            i += 1;
        }
        last = text[start..i].trim_end_matches('.').parse().ok().or(last);
    }
    last
}
