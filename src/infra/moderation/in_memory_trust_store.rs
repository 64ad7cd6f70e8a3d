// In-memory implementation of TrustStore.
//
// Used by tests and by single-process runs with `TRUST_STORE_URL=memory://`.
// Nothing survives a restart.

use crate::core::moderation::{TrustStore, TrustStoreError, UserKey, UserRecord};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

/// **DashMap:**
/// Each key lives in one shard guarded by its own lock, so `entry()` gives
/// an atomic read-modify-write per user while different users rarely contend.
pub struct InMemoryTrustStore {
    records: DashMap<UserKey, UserRecord>,
}

impl InMemoryTrustStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }
}

impl Default for InMemoryTrustStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TrustStore for InMemoryTrustStore {
    async fn get_user_count(&self, key: &UserKey) -> Result<u64, TrustStoreError> {
        Ok(self
            .records
            .get(key)
            .map(|entry| entry.interaction_count)
            .unwrap_or(0))
    }

    async fn increment_user_count_by(
        &self,
        key: &UserKey,
        amount: u64,
    ) -> Result<u64, TrustStoreError> {
        let now = Utc::now();

        // The shard lock is held for the whole update
        let mut entry = self.records.entry(*key).or_insert_with(|| UserRecord {
            key: *key,
            interaction_count: 0,
            last_seen: now,
            trusted: None,
        });
        entry.interaction_count = entry.interaction_count.saturating_add(amount);
        entry.last_seen = now;

        Ok(entry.interaction_count)
    }

    async fn get_user_record(&self, key: &UserKey) -> Result<Option<UserRecord>, TrustStoreError> {
        Ok(self.records.get(key).map(|entry| entry.clone()))
    }

    async fn set_trust_flag(&self, key: &UserKey, trusted: bool) -> Result<(), TrustStoreError> {
        if let Some(mut entry) = self.records.get_mut(key) {
            entry.trusted = Some(trusted);
        }
        Ok(())
    }

    async fn is_empty(&self) -> Result<bool, TrustStoreError> {
        Ok(self.records.is_empty())
    }
}
