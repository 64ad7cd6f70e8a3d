pub mod in_memory_trust_store;
pub mod redis_trust_store;
pub mod sqlite_trust_store;

pub use in_memory_trust_store::InMemoryTrustStore;
pub use redis_trust_store::RedisTrustStore;
pub use sqlite_trust_store::SqliteTrustStore;

use crate::core::moderation::TrustStore;

/// Open the trust store named by `url`, picking the backend from its scheme.
///
/// - `sqlite:...` or a bare file path: SQLite
/// - `redis://` / `rediss://`: Redis
/// - `memory://`: in-process only
pub async fn connect_trust_store(url: &str) -> anyhow::Result<Box<dyn TrustStore>> {
    if url.starts_with("memory://") {
        tracing::warn!("Using in-memory trust store, counts will not survive a restart");
        Ok(Box::new(InMemoryTrustStore::new()))
    } else if url.starts_with("redis://") || url.starts_with("rediss://") {
        Ok(Box::new(RedisTrustStore::new(url).await?))
    } else if url.contains("://") && !url.starts_with("sqlite:") {
        anyhow::bail!("Unsupported trust store URL scheme: {}", url)
    } else {
        let store = SqliteTrustStore::new(url).await?;
        tracing::info!(url, "Opened SQLite trust store");
        Ok(Box::new(store))
    }
}
