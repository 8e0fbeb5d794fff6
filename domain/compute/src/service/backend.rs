use async_trait::async_trait;

use crate::model::entity::Job;
use crate::model::vo::RunMethod;

/// Admission control for one run method.
#[async_trait]
pub trait BackendManager: Send + Sync {
    fn run_method(&self) -> RunMethod;

    /// Handle the latest snapshot of unfinished jobs bound to this run method.
    async fn handle_jobs(&self, jobs: Vec<Job>) -> anyhow::Result<()>;

    /// Periodic hook called on every tick.
    async fn do_work(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
