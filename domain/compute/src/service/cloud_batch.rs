use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::model::vo::RequiredResources;

#[derive(Clone, Debug, PartialEq)]
pub struct CloudBatchSubmission {
    pub job_name: String,
    pub job_definition: String,
    pub env: BTreeMap<String, String>,
    pub resources: RequiredResources,
    /// Server-side timeout.
    pub timeout: Duration,
}

/// Cloud batch service holding one job definition per containerized app.
#[async_trait]
pub trait CloudBatchService: Send + Sync {
    /// Job definition name used for an app.
    fn job_definition_name(&self, app_name: &str) -> String;

    /// Container image of the active revision of a job definition.
    async fn job_definition_image(&self, job_definition: &str) -> anyhow::Result<Option<String>>;

    /// Register the job definition unless an identical one exists.
    async fn ensure_job_definition(&self, app_name: &str, image: &str) -> anyhow::Result<()>;

    /// Returns the batch job id.
    async fn submit_job(&self, submission: &CloudBatchSubmission) -> anyhow::Result<String>;
}
