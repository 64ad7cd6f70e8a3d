// Trust store port - the core defines WHAT it needs from persistence,
// the infra layer decides HOW (SQLite, Redis, in-memory).

use super::moderation_models::{UserKey, UserRecord};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrustStoreError {
    /// Connectivity loss. The engine applies its store failure policy.
    #[error("Trust store unavailable: {0}")]
    Unavailable(String),

    #[error("Storage error: {0}")]
    StorageError(String),
}

/// Durable per-user interaction counters.
///
/// Implementations never retry on their own: a silent retry of an increment
/// could count one message twice.
#[async_trait]
pub trait TrustStore: Send + Sync {
    /// Current count for a key, 0 if the key was never seen.
    async fn get_user_count(&self, key: &UserKey) -> Result<u64, TrustStoreError>;

    /// Atomically add `amount` to the count and return the new value.
    ///
    /// Must be a single atomic primitive on the backend. Concurrent callers
    /// for the same key observe distinct, strictly increasing results.
    /// Also refreshes the last-seen timestamp.
    async fn increment_user_count_by(
        &self,
        key: &UserKey,
        amount: u64,
    ) -> Result<u64, TrustStoreError>;

    /// Count one observed message.
    async fn increment_user_count(&self, key: &UserKey) -> Result<u64, TrustStoreError> {
        self.increment_user_count_by(key, 1).await
    }

    async fn get_user_record(&self, key: &UserKey) -> Result<Option<UserRecord>, TrustStoreError>;

    /// Cache whether the user is trusted.
    async fn set_trust_flag(&self, key: &UserKey, trusted: bool) -> Result<(), TrustStoreError>;

    /// True when no trust data exists at all.
    async fn is_empty(&self) -> Result<bool, TrustStoreError>;

    /// Release connections. Called once during shutdown.
    async fn close(&self) {}
}

// Blanket implementation for Box<dyn TrustStore>
// so the backend can be chosen from the store URL at startup.
#[async_trait]
impl TrustStore for Box<dyn TrustStore> {
    async fn get_user_count(&self, key: &UserKey) -> Result<u64, TrustStoreError> {
        (**self).get_user_count(key).await
    }

    async fn increment_user_count_by(
        &self,
        key: &UserKey,
        amount: u64,
    ) -> Result<u64, TrustStoreError> {
        (**self).increment_user_count_by(key, amount).await
    }

    async fn increment_user_count(&self, key: &UserKey) -> Result<u64, TrustStoreError> {
        (**self).increment_user_count(key).await
    }

    async fn get_user_record(&self, key: &UserKey) -> Result<Option<UserRecord>, TrustStoreError> {
        (**self).get_user_record(key).await
    }

    async fn set_trust_flag(&self, key: &UserKey, trusted: bool) -> Result<(), TrustStoreError> {
        (**self).set_trust_flag(key, trusted).await
    }

    async fn is_empty(&self) -> Result<bool, TrustStoreError> {
        (**self).is_empty().await
    }

    async fn close(&self) {
        (**self).close().await
    }
}
