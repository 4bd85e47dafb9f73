use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Shared key-value store: token cache, reviewed-mention set, run lease.
/// Every operation is a single atomic key operation.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
    async fn members(&self, set_key: &str) -> Result<Vec<String>>;
    async fn add(&self, set_key: &str, member: &str) -> Result<()>;

    /// Sets `key` only if absent. Returns whether this caller now holds it.
    async fn acquire_lease(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool>;
    /// Deletes `key` only while `holder` still owns it. Returns whether it
    /// was released; false means the lease expired and may belong to
    /// another run now.
    async fn release_lease(&self, key: &str, holder: &str) -> Result<bool>;
}
