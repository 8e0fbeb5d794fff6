use std::path::PathBuf;

use async_trait::async_trait;

/// One rendered allocation request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HpcSubmission {
    pub group_id: String,
    pub script_path: PathBuf,
    /// Scheduler options, e.g. `--ntasks=4`.
    pub options: Vec<String>,
}

#[async_trait]
pub trait HpcSubmitter: Send + Sync {
    /// Hand the submission to the scheduler without waiting for it.
    async fn submit(&self, submission: HpcSubmission) -> anyhow::Result<()>;
}
