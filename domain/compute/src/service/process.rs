use async_trait::async_trait;

use crate::model::vo::LaunchSpec;

/// A started unit of work that can be polled and stopped.
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    fn pid(&self) -> Option<u32>;

    async fn is_alive(&self) -> bool;

    /// Exit code once the process ended, `None` while it runs.
    async fn try_exit_code(&self) -> anyhow::Result<Option<i32>>;

    async fn terminate(&self) -> anyhow::Result<()>;
}

#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Start a process owned by the caller.
    async fn spawn(&self, spec: &LaunchSpec) -> anyhow::Result<Box<dyn ProcessHandle>>;

    /// Start a process that survives the caller exiting.
    async fn spawn_detached(&self, spec: &LaunchSpec) -> anyhow::Result<Option<u32>>;
}
