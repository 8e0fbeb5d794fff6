use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use domain_compute::{
    model::entity::JobCredentials,
    service::{CoordinationService, ProcessHandle, SystemSampler},
};
use tokio::io::AsyncWriteExt;
use tokio::time::sleep;
use tracing::warn;
use typed_builder::TypedBuilder;

use super::{upload_output, Cadence, Ticker};

pub const RESOURCE_LOG_NAME: &str = "_resource_utilization_log";

/// Samples host utilization into a JSON-lines log and ships it.
#[derive(TypedBuilder)]
pub struct ResourceUtilizationMonitor {
    coordination: Arc<dyn CoordinationService>,
    sampler: Arc<dyn SystemSampler>,
    job: JobCredentials,
    #[builder(setter(into))]
    log_file: PathBuf,
    #[builder(default = Duration::from_secs(10))]
    sample_interval: Duration,
    #[builder(default)]
    cadence: Cadence,
    #[builder(default = Duration::from_secs(1))]
    poll_interval: Duration,
}

impl ResourceUtilizationMonitor {
    pub async fn run(&self, parent: &dyn ProcessHandle) {
        let mut sampling = Ticker::new(Cadence::fixed(self.sample_interval));
        let mut flushing = Ticker::new(self.cadence.clone());
        while parent.is_alive().await {
            sleep(self.poll_interval).await;
            if sampling.due() {
                if let Err(e) = self.record_sample().await {
                    warn!("Unable to record resource sample: {e:#}");
                }
            }
            if flushing.due() {
                if let Err(e) = self.flush().await {
                    warn!("Unable to upload resource log of job {}: {e:#}", self.job.job_id);
                }
            }
        }
        if let Err(e) = self.flush().await {
            warn!("Final resource log upload of job {} failed: {e:#}", self.job.job_id);
        }
    }

    async fn record_sample(&self) -> anyhow::Result<()> {
        let sample = self.sampler.sample().await?;
        let mut line = serde_json::to_string(&sample)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)
            .await
            .with_context(|| format!("Unable to open {}", self.log_file.display()))?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn flush(&self) -> anyhow::Result<()> {
        let content = match tokio::fs::read(&self.log_file).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        upload_output(self.coordination.as_ref(), &self.job, RESOURCE_LOG_NAME, content).await
    }
}
