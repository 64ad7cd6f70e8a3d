// Application configuration, read from the environment (and `.env` via dotenv).
//
// Everything goes through a lookup function so tests can feed a HashMap
// instead of mutating the process environment.

use crate::core::classifier::{RateLimiterConfig, RetryPolicy};
use crate::core::moderation::{
    ChannelPolicy, ClassifyPolicy, FailurePolicy, ModerationConfig, UserScope,
};
use crate::infra::ai::ProviderKind;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_TRUST_STORE_URL: &str = "sqlite://data/trust.db";
/// Slowest accepted classifier rate: one call every ~17 minutes.
const MIN_RATE_PER_SEC: f64 = 0.001;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("No classifier prompt configured (set PROMPT or PROMPT_FILE)")]
    MissingPrompt,

    #[error("Failed to read prompt file {path}: {source}")]
    PromptFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Missing {var} for classifier provider {provider}")]
    MissingCredentials {
        provider: ProviderKind,
        var: &'static str,
    },

    #[error("Invalid value for {var}: {message}")]
    Invalid { var: &'static str, message: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub discord_token: String,
    pub provider: ProviderKind,
    pub model: String,
    pub api_key: String,
    pub moderation: ModerationConfig,
    pub rate_limit: RateLimiterConfig,
    pub retry: RetryPolicy,
    pub trust_store_url: String,
    pub history_file: Option<PathBuf>,
    pub shutdown_grace: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let discord_token = get("DISCORD_TOKEN").ok_or(ConfigError::Missing("DISCORD_TOKEN"))?;

        let prompt = match (get("PROMPT"), get("PROMPT_FILE")) {
            (Some(prompt), _) => prompt,
            (None, Some(path)) => {
                let path = PathBuf::from(path);
                std::fs::read_to_string(&path)
                    .map_err(|source| ConfigError::PromptFile { path, source })?
            }
            (None, None) => return Err(ConfigError::MissingPrompt),
        };
        if prompt.trim().is_empty() {
            return Err(ConfigError::MissingPrompt);
        }

        let provider: ProviderKind = parse_or(&get, "AI_PROVIDER", ProviderKind::OpenAi)?;
        let model = get("AI_MODEL").unwrap_or_else(|| provider.default_model().to_string());
        let api_key = get(provider.api_key_var()).ok_or(ConfigError::MissingCredentials {
            provider,
            var: provider.api_key_var(),
        })?;

        let spam_threshold: f64 = parse_or(&get, "SPAM_THRESHOLD", 0.5)?;
        if !(0.0..=1.0).contains(&spam_threshold) {
            return Err(invalid("SPAM_THRESHOLD", "must be between 0 and 1"));
        }
        let suppress_threshold: Option<f64> = parse_opt(&get, "SUPPRESS_THRESHOLD")?;
        if let Some(suppress) = suppress_threshold {
            if !(spam_threshold..=1.0).contains(&suppress) {
                return Err(invalid(
                    "SUPPRESS_THRESHOLD",
                    "must be between SPAM_THRESHOLD and 1",
                ));
            }
        }

        let classify_policy = match get("CLASSIFY_POLICY").as_deref().map(str::trim) {
            None | Some("new-users") => ClassifyPolicy::NewUsersOnly,
            Some("all") => ClassifyPolicy::AllUsers,
            Some(other) => {
                return Err(invalid(
                    "CLASSIFY_POLICY",
                    format!("'{}' (expected new-users or all)", other),
                ))
            }
        };

        let user_scope = match get("USER_SCOPE").as_deref().map(str::trim) {
            None | Some("global") => UserScope::Global,
            Some("channel") => UserScope::PerChannel,
            Some(other) => {
                return Err(invalid(
                    "USER_SCOPE",
                    format!("'{}' (expected global or channel)", other),
                ))
            }
        };

        let whitelist = match get("WHITELIST_CHANNELS") {
            Some(raw) => parse_channel_list(&raw)?,
            None => Vec::new(),
        };

        let moderation = ModerationConfig {
            prompt,
            spam_threshold,
            suppress_threshold,
            new_user_threshold: parse_or(&get, "NEW_USER_THRESHOLD", 1)?,
            classify_policy,
            user_scope,
            channel_policy: ChannelPolicy::new(whitelist),
            classifier_failure_policy: parse_failure_policy(&get, "CLASSIFIER_FAILURE_POLICY")?,
            store_failure_policy: parse_failure_policy(&get, "STORE_FAILURE_POLICY")?,
        };

        let rate_per_sec: f64 = parse_or(&get, "CLASSIFIER_RATE_PER_SEC", 2.0)?;
        if !rate_per_sec.is_finite()
            || rate_per_sec < 0.0
            || (rate_per_sec > 0.0 && rate_per_sec < MIN_RATE_PER_SEC)
        {
            return Err(invalid(
                "CLASSIFIER_RATE_PER_SEC",
                format!("must be 0 (unlimited) or at least {}", MIN_RATE_PER_SEC),
            ));
        }
        let rate_limit = RateLimiterConfig {
            rate_per_sec,
            burst: parse_or(&get, "CLASSIFIER_BURST", 5)?,
            max_wait: Duration::from_millis(parse_or(&get, "CLASSIFIER_MAX_WAIT_MS", 5000)?),
        };

        let max_attempts: u32 = parse_or(&get, "CLASSIFIER_MAX_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            return Err(invalid("CLASSIFIER_MAX_ATTEMPTS", "must be at least 1"));
        }
        let retry = RetryPolicy {
            max_attempts,
            base_backoff: Duration::from_millis(parse_or(&get, "CLASSIFIER_BACKOFF_MS", 500)?),
            call_timeout: Duration::from_secs(parse_or(&get, "CLASSIFIER_TIMEOUT_SECS", 15)?),
            ..RetryPolicy::default()
        };

        Ok(Self {
            discord_token,
            provider,
            model,
            api_key,
            moderation,
            rate_limit,
            retry,
            trust_store_url: get("TRUST_STORE_URL")
                .unwrap_or_else(|| DEFAULT_TRUST_STORE_URL.to_string()),
            history_file: get("HISTORY_FILE").map(PathBuf::from),
            shutdown_grace: Duration::from_secs(parse_or(&get, "SHUTDOWN_GRACE_SECS", 10)?),
        })
    }
}

fn invalid(var: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        message: message.into(),
    }
}

fn parse_opt<T>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    get(var)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| invalid(var, format!("'{}': {}", raw, e)))
        })
        .transpose()
}

fn parse_or<T>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    Ok(parse_opt(get, var)?.unwrap_or(default))
}

fn parse_failure_policy(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<FailurePolicy, ConfigError> {
    match get(var).as_deref().map(str::trim) {
        None | Some("open") | Some("fail-open") => Ok(FailurePolicy::FailOpen),
        Some("closed") | Some("fail-closed") => Ok(FailurePolicy::FailClosed),
        Some(other) => Err(invalid(var, format!("'{}' (expected open or closed)", other))),
    }
}

fn parse_channel_list(raw: &str) -> Result<Vec<i64>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|e| invalid("WHITELIST_CHANNELS", format!("'{}': {}", s, e)))
        })
        .collect()
}
