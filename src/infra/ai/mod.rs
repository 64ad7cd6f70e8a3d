// Vendor classifier clients. Each one turns a single `score()` call into one
// HTTP request; retries and rate limiting live in `ClassifierService`.

pub mod anthropic_client;
pub mod openai_client;

pub use anthropic_client::AnthropicClassifier;
pub use openai_client::OpenAiClassifier;

use crate::core::classifier::{ClassifierError, ClassifierProvider};
use reqwest::StatusCode;
use std::fmt;
use std::str::FromStr;

/// Replies are a single number or a tiny JSON object.
const MAX_REPLY_TOKENS: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    OpenRouter,
}

impl ProviderKind {
    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-4o-mini",
            ProviderKind::Anthropic => "claude-3-5-haiku-latest",
            ProviderKind::OpenRouter => "openai/gpt-4o-mini",
        }
    }

    /// Environment variable holding this vendor's API key.
    pub fn api_key_var(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::OpenRouter => "OPENROUTER_API_KEY",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            "openrouter" => Ok(ProviderKind::OpenRouter),
            other => Err(format!(
                "unknown provider '{}' (expected openai, anthropic or openrouter)",
                other
            )),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::OpenAi => write!(f, "openai"),
            ProviderKind::Anthropic => write!(f, "anthropic"),
            ProviderKind::OpenRouter => write!(f, "openrouter"),
        }
    }
}

/// Build the configured vendor client behind the provider trait.
pub fn provider_from_settings(
    kind: ProviderKind,
    api_key: String,
    model: String,
) -> Box<dyn ClassifierProvider> {
    match kind {
        ProviderKind::OpenAi => Box::new(OpenAiClassifier::openai(api_key, model)),
        ProviderKind::OpenRouter => Box::new(OpenAiClassifier::openrouter(api_key, model)),
        ProviderKind::Anthropic => Box::new(AnthropicClassifier::new(api_key, model)),
    }
}

/// Map a non-success HTTP status to the classifier error taxonomy.
pub(crate) fn error_for_status(vendor: &str, status: StatusCode, body: &str) -> ClassifierError {
    let message = format!("{} API error: {} - {}", vendor, status, body);
    match status.as_u16() {
        401 | 403 => ClassifierError::Auth(message),
        408 | 429 => ClassifierError::Transient(message),
        s if s >= 500 => ClassifierError::Transient(message),
        _ => ClassifierError::Other(message),
    }
}

/// Map a transport-level reqwest failure.
pub(crate) fn error_for_transport(vendor: &str, e: reqwest::Error) -> ClassifierError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        ClassifierError::Transient(format!("{} request failed: {}", vendor, e))
    } else {
        ClassifierError::Other(format!("{} request failed: {}", vendor, e))
    }
}
