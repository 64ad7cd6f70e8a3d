// Classifier capability - vendor-neutral scoring with rate limiting and retries.

pub mod classifier_models;
pub mod classifier_service;
pub mod rate_limiter;

pub use classifier_models::*;
pub use classifier_service::{parse_score, ClassifierProvider, ClassifierService};
pub use rate_limiter::RateLimiterConfig;
