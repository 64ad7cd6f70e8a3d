// SQLite-backed trust store.
//
// Tables:
// - trust_users: one row per user key with its interaction counter
//
// Increments are a single upsert with RETURNING, so SQLite does the
// read-modify-write atomically and concurrent writers never lose a count.

use crate::core::moderation::{TrustStore, TrustStoreError, UserKey, UserRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;

pub struct SqliteTrustStore {
    pool: Pool<Sqlite>,
}

fn map_sqlx_error(e: sqlx::Error) -> TrustStoreError {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => TrustStoreError::Unavailable(e.to_string()),
        other => TrustStoreError::StorageError(other.to_string()),
    }
}

impl SqliteTrustStore {
    /// Open (creating if needed) the database at `database_url` and migrate it.
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let in_memory = database_url.contains(":memory:");

        // Ensure the file exists if it's a file path
        let path_str = database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");
        if !in_memory && !Path::new(path_str).exists() {
            if let Some(parent) = Path::new(path_str).parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::File::create(path_str)?;
        }

        let conn_str = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            format!("sqlite://{}", database_url)
        };

        // Every connection to :memory: gets its own database, so keep one.
        let max_connections = if in_memory { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&conn_str)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Run database migrations to create required tables.
    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trust_users (
                user_key TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                channel_id INTEGER,
                interaction_count INTEGER NOT NULL DEFAULT 0,
                last_seen TEXT NOT NULL,
                trusted BOOLEAN
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl TrustStore for SqliteTrustStore {
    async fn get_user_count(&self, key: &UserKey) -> Result<u64, TrustStoreError> {
        let row = sqlx::query("SELECT interaction_count FROM trust_users WHERE user_key = ?")
            .bind(key.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(row
            .map(|r| r.get::<i64, _>("interaction_count") as u64)
            .unwrap_or(0))
    }

    async fn increment_user_count_by(
        &self,
        key: &UserKey,
        amount: u64,
    ) -> Result<u64, TrustStoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO trust_users (user_key, user_id, channel_id, interaction_count, last_seen)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(user_key) DO UPDATE SET
                interaction_count = interaction_count + excluded.interaction_count,
                last_seen = excluded.last_seen
            RETURNING interaction_count
            "#,
        )
        .bind(key.to_string())
        .bind(key.user_id)
        .bind(key.channel_id)
        .bind(amount as i64)
        .bind(Utc::now().to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let count: i64 = row.get("interaction_count");
        Ok(count as u64)
    }

    async fn get_user_record(&self, key: &UserKey) -> Result<Option<UserRecord>, TrustStoreError> {
        let row = sqlx::query(
            "SELECT interaction_count, last_seen, trusted FROM trust_users WHERE user_key = ?",
        )
        .bind(key.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(|row| {
            let last_seen_str: String = row.get("last_seen");
            let last_seen = DateTime::parse_from_rfc3339(&last_seen_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());

            UserRecord {
                key: *key,
                interaction_count: row.get::<i64, _>("interaction_count") as u64,
                last_seen,
                trusted: row.get::<Option<bool>, _>("trusted"),
            }
        }))
    }

    async fn set_trust_flag(&self, key: &UserKey, trusted: bool) -> Result<(), TrustStoreError> {
        sqlx::query("UPDATE trust_users SET trusted = ? WHERE user_key = ?")
            .bind(trusted)
            .bind(key.to_string())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn is_empty(&self) -> Result<bool, TrustStoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM trust_users")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let total: i64 = row.get("total");
        Ok(total == 0)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
