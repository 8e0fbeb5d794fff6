use async_trait::async_trait;

use crate::model::entity::job::JobCredentials;
use crate::model::entity::Job;
use crate::model::vo::{AppDescriptor, ComputeResourceSpec, JobStatus};

/// The remote coordination service, the system of record for jobs.
#[async_trait]
pub trait CoordinationService: Send + Sync {
    /// Jobs of this compute resource in `pending|queued|starting|running`.
    async fn get_unfinished_jobs(&self) -> anyhow::Result<Vec<Job>>;

    /// Apps assigned to this compute resource.
    async fn get_apps(&self) -> anyhow::Result<Vec<AppDescriptor>>;

    /// Publish the aggregate capability spec.
    async fn put_spec(&self, spec: &ComputeResourceSpec) -> anyhow::Result<()>;

    async fn set_job_status(
        &self,
        job: &JobCredentials,
        status: JobStatus,
        error: Option<String>,
        force_update: bool,
    ) -> anyhow::Result<()>;

    async fn get_job_status(&self, job: &JobCredentials) -> anyhow::Result<JobStatus>;

    /// Short-lived presigned URL for uploading output `output_name`.
    async fn get_upload_url(&self, job: &JobCredentials, output_name: &str)
        -> anyhow::Result<String>;

    /// `PUT` content to a presigned URL.
    async fn upload_to_url(&self, url: &str, content: Vec<u8>) -> anyhow::Result<()>;

    /// Full job descriptor.
    async fn get_job(&self, job: &JobCredentials) -> anyhow::Result<Job>;
}
