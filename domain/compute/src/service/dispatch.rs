use async_trait::async_trait;

use crate::exception::ComputeResult;
use crate::model::entity::Job;
use crate::model::vo::{DispatchMode, DispatchOutcome};

/// Turns an admitted job into a running computation (or its shell command).
#[async_trait]
pub trait JobDispatchService: Send + Sync {
    async fn start_job(&self, job: &Job, mode: DispatchMode) -> ComputeResult<DispatchOutcome>;
}
