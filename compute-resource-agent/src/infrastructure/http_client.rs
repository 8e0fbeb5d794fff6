use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use domain_compute::{
    model::{
        entity::{Job, JobCredentials},
        vo::{AppDescriptor, ComputeResourceSpec, JobStatus},
    },
    service::CoordinationService,
};
use reqwest::{Method, RequestBuilder, Url};
use tracing::warn;

use super::signing::{ComputeResourceIdentity, JOB_PRIVATE_KEY_HEADER};
use crate::dto::{
    AppsResponse, JobResponse, JobStatusResponse, SetJobStatusRequest, SetSpecRequest,
    UnfinishedJobsResponse, UploadUrlResponse,
};

/// REST client of the coordination service.
pub struct CoordinationClient {
    client: Arc<reqwest::Client>,
    base_url: String,
    /// Needed for compute-resource calls only; job processes run without it.
    identity: Option<Arc<ComputeResourceIdentity>>,
    max_times: u32,
    timeout: Duration,
}

#[async_trait]
impl CoordinationService for CoordinationClient {
    async fn get_unfinished_jobs(&self) -> anyhow::Result<Vec<Job>> {
        let path = self.compute_resource_path("unfinished_jobs")?;
        let response = self
            .http_send(|| self.signed(Method::GET, &path), self.max_times)
            .await?;
        let body: UnfinishedJobsResponse = response.json().await?;
        Ok(body.jobs)
    }

    async fn get_apps(&self) -> anyhow::Result<Vec<AppDescriptor>> {
        let path = self.compute_resource_path("apps")?;
        let response = self
            .http_send(|| self.signed(Method::GET, &path), self.max_times)
            .await?;
        let body: AppsResponse = response.json().await?;
        Ok(body.apps)
    }

    async fn put_spec(&self, spec: &ComputeResourceSpec) -> anyhow::Result<()> {
        let path = self.compute_resource_path("spec")?;
        let body = SetSpecRequest { spec };
        self.http_send(
            || Ok(self.signed(Method::PUT, &path)?.json(&body)),
            self.max_times,
        )
        .await?;
        Ok(())
    }

    async fn set_job_status(
        &self,
        job: &JobCredentials,
        status: JobStatus,
        error: Option<String>,
        force_update: bool,
    ) -> anyhow::Result<()> {
        let path = job_path(&job.job_id, "/status");
        let body = SetJobStatusRequest {
            status,
            error,
            force_update,
        };
        // Terminal reports are best effort.
        let max_times = if status.is_terminal() { 1 } else { self.max_times };
        self.http_send(
            || Ok(self.job_scoped(Method::PUT, &path, job)?.json(&body)),
            max_times,
        )
        .await
        .with_context(|| format!("Unable to set status {status} for job {}", job.job_id))?;
        Ok(())
    }

    async fn get_job_status(&self, job: &JobCredentials) -> anyhow::Result<JobStatus> {
        let path = job_path(&job.job_id, "/status");
        let response = self
            .http_send(|| self.job_scoped(Method::GET, &path, job), self.max_times)
            .await?;
        let body: JobStatusResponse = response.json().await?;
        Ok(body.status)
    }

    async fn get_upload_url(
        &self,
        job: &JobCredentials,
        output_name: &str,
    ) -> anyhow::Result<String> {
        let path = job_path(&job.job_id, &format!("/outputs/{output_name}/upload_url"));
        let response = self
            .http_send(|| self.job_scoped(Method::GET, &path, job), self.max_times)
            .await?;
        let body: UploadUrlResponse = response.json().await?;
        Ok(body.upload_url)
    }

    async fn upload_to_url(&self, url: &str, content: Vec<u8>) -> anyhow::Result<()> {
        let url = Url::parse(url).context("Invalid upload url")?;
        self.http_send(
            || Ok(self.client.put(url.clone()).body(content.clone())),
            self.max_times,
        )
        .await?;
        Ok(())
    }

    async fn get_job(&self, job: &JobCredentials) -> anyhow::Result<Job> {
        let path = job_path(&job.job_id, "");
        let response = self
            .http_send(|| self.job_scoped(Method::GET, &path, job), self.max_times)
            .await?;
        let body: JobResponse = response.json().await?;
        Ok(body.job)
    }
}

fn job_path(job_id: &str, suffix: &str) -> String {
    format!("/api/processor/jobs/{job_id}{suffix}")
}

impl CoordinationClient {
    pub fn new(
        client: Arc<reqwest::Client>,
        base_url: impl Into<String>,
        identity: Option<Arc<ComputeResourceIdentity>>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            identity,
            max_times: 3,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_retry(mut self, max_times: u32, timeout: Duration) -> Self {
        self.max_times = max_times.max(1);
        self.timeout = timeout;
        self
    }

    fn identity(&self) -> anyhow::Result<&ComputeResourceIdentity> {
        self.identity
            .as_deref()
            .context("Compute resource identity is required for this request")
    }

    fn compute_resource_path(&self, suffix: &str) -> anyhow::Result<String> {
        Ok(format!(
            "/api/compute_resource/compute_resources/{}/{suffix}",
            self.identity()?.id()
        ))
    }

    fn url(&self, path: &str) -> anyhow::Result<Url> {
        Url::parse(&format!("{}{path}", self.base_url))
            .with_context(|| format!("Invalid coordination url for {path}"))
    }

    /// A request signed with the compute resource key. Signed again on every
    /// attempt so the payload timestamp stays fresh.
    fn signed(&self, method: Method, path: &str) -> anyhow::Result<RequestBuilder> {
        let headers = self.identity()?.sign_request(
            method.as_str(),
            path,
            chrono::Utc::now().timestamp(),
        )?;
        let mut request = self.client.request(method, self.url(path)?);
        for (name, value) in headers.pairs() {
            request = request.header(name, value);
        }
        Ok(request)
    }

    fn job_scoped(
        &self,
        method: Method,
        path: &str,
        job: &JobCredentials,
    ) -> anyhow::Result<RequestBuilder> {
        Ok(self
            .client
            .request(method, self.url(path)?)
            .header(JOB_PRIVATE_KEY_HEADER, job.job_private_key.as_str()))
    }

    /// Send with up to `max_times` attempts. Client errors are not retried.
    async fn http_send<F>(&self, build: F, max_times: u32) -> anyhow::Result<reqwest::Response>
    where
        F: Fn() -> anyhow::Result<RequestBuilder>,
    {
        let mut times = 1u32;
        loop {
            let request = build()?;
            let error = tokio::select! {
                x = request.send() => {
                    match x {
                        Ok(x) => {
                            if x.status().is_client_error() {
                                let status = x.status();
                                let text = x.text().await.unwrap_or_default();
                                anyhow::bail!("Request rejected with {status}: {text}");
                            }
                            match x.error_for_status() {
                                Ok(x) => return Ok(x),
                                Err(e) => anyhow::anyhow!(e),
                            }
                        }
                        Err(e) => anyhow::anyhow!(e),
                    }
                }
                _ = tokio::time::sleep(self.timeout) => anyhow::anyhow!("request timeout"),
            };
            if times >= max_times {
                return Err(error);
            }
            warn!("Attempt {times}/{max_times} failed: {error:#}");
            sleep(times).await;
            times += 1;
        }
    }
}

/// Jittered backoff growing with the attempt number.
async fn sleep(times: u32) {
    let sleep_time = {
        let base = rand::random::<u8>() as u64;
        let jitter = rand::random::<u8>() as u64;
        (if base > 0 && base <= 10 {
            base * 100
        } else if base > 10 && base <= 100 {
            base * 10
        } else {
            500
        }) + jitter
    } * times as u64;
    tokio::time::sleep(Duration::from_millis(sleep_time)).await;
}
