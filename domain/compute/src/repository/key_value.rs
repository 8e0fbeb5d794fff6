use std::time::Duration;

use async_trait::async_trait;

/// Small durable store shared between the daemon and detached job processes.
///
/// Used for HPC group assignments (job id -> group id) and cancellation
/// markers. Implementations must tolerate entries being created or removed
/// concurrently by other processes.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn put(&self, key: &str, value: &str) -> anyhow::Result<()>;

    /// `None` when the key is absent, including when it vanished mid-read.
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// Remove every entry not written within `max_age`; returns how many were removed.
    async fn purge_older_than(&self, max_age: Duration) -> anyhow::Result<usize>;
}
