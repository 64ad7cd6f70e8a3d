// Redis-backed trust store for deployments where several bot processes share
// one set of counters.
//
// Keys:
// - user:<id>[:channel:<id>]       integer counter, bumped with INCRBY
// - meta:user:<id>[:channel:<id>]  hash with `last_seen` and `trusted`

use crate::core::moderation::{TrustStore, TrustStoreError, UserKey, UserRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use std::sync::Mutex;

pub struct RedisTrustStore {
    /// `None` once closed.
    conn: Mutex<Option<MultiplexedConnection>>,
}

fn map_redis_error(e: redis::RedisError) -> TrustStoreError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_timeout() || e.is_connection_refusal()
    {
        TrustStoreError::Unavailable(e.to_string())
    } else {
        TrustStoreError::StorageError(e.to_string())
    }
}

fn counter_key(key: &UserKey) -> String {
    key.to_string()
}

fn meta_key(key: &UserKey) -> String {
    format!("meta:{}", key)
}

impl RedisTrustStore {
    pub async fn new(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        tracing::info!("Connected to Redis trust store");
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    /// A handle onto the shared connection. Clones are cheap and multiplexed.
    fn connection(&self) -> Result<MultiplexedConnection, TrustStoreError> {
        self.conn
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| TrustStoreError::Unavailable("trust store is closed".to_string()))
    }
}

#[async_trait]
impl TrustStore for RedisTrustStore {
    async fn get_user_count(&self, key: &UserKey) -> Result<u64, TrustStoreError> {
        let mut conn = self.connection()?;
        let count: Option<u64> = redis::cmd("GET")
            .arg(counter_key(key))
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(count.unwrap_or(0))
    }

    async fn increment_user_count_by(
        &self,
        key: &UserKey,
        amount: u64,
    ) -> Result<u64, TrustStoreError> {
        let mut conn = self.connection()?;
        // MULTI/EXEC so the counter and its timestamp move together
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("INCRBY")
            .arg(counter_key(key))
            .arg(amount)
            .cmd("HSET")
            .arg(meta_key(key))
            .arg("last_seen")
            .arg(Utc::now().to_rfc3339())
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(count)
    }

    async fn get_user_record(&self, key: &UserKey) -> Result<Option<UserRecord>, TrustStoreError> {
        let mut conn = self.connection()?;
        let (count, (last_seen, trusted)): (Option<u64>, (Option<String>, Option<String>)) =
            redis::pipe()
                .cmd("GET")
                .arg(counter_key(key))
                .cmd("HMGET")
                .arg(meta_key(key))
                .arg("last_seen")
                .arg("trusted")
                .query_async(&mut conn)
                .await
                .map_err(map_redis_error)?;

        Ok(count.map(|interaction_count| UserRecord {
            key: *key,
            interaction_count,
            last_seen: last_seen
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(Utc::now),
            trusted: trusted.map(|t| t == "1"),
        }))
    }

    async fn set_trust_flag(&self, key: &UserKey, trusted: bool) -> Result<(), TrustStoreError> {
        let mut conn = self.connection()?;
        let _: () = redis::cmd("HSET")
            .arg(meta_key(key))
            .arg("trusted")
            .arg(if trusted { "1" } else { "0" })
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn is_empty(&self) -> Result<bool, TrustStoreError> {
        let mut conn = self.connection()?;
        let size: u64 = redis::cmd("DBSIZE")
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(size == 0)
    }

    async fn close(&self) {
        // Dropping the last handle shuts the multiplexed connection down
        if self.conn.lock().unwrap_or_else(|e| e.into_inner()).take().is_some() {
            tracing::info!("Redis trust store closed");
        }
    }
}
