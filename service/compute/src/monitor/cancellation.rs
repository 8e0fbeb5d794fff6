use std::sync::Arc;
use std::time::Duration;

use domain_compute::{
    model::{entity::JobCredentials, vo::JobStatus},
    repository::KeyValueStore,
    service::{CoordinationService, ProcessHandle},
};
use tokio::time::sleep;
use tracing::{info, warn};
use typed_builder::TypedBuilder;

use super::{Cadence, Ticker};
use crate::runner::CANCEL_MARKER_KEY;

/// Watches the job status and leaves a cancel marker for the wrapper once the
/// job is no longer `running` upstream.
#[derive(TypedBuilder)]
pub struct CancellationMonitor {
    coordination: Arc<dyn CoordinationService>,
    /// Store shared with the job wrapper.
    markers: Arc<dyn KeyValueStore>,
    job: JobCredentials,
    #[builder(default)]
    cadence: Cadence,
    #[builder(default = Duration::from_secs(1))]
    poll_interval: Duration,
    /// Consecutive status check failures after which the job is canceled.
    #[builder(default = 3)]
    max_consecutive_failures: u32,
}

impl CancellationMonitor {
    /// Returns the cancel reason when a marker was written.
    pub async fn run(&self, parent: &dyn ProcessHandle) -> Option<String> {
        let mut ticker = Ticker::new(self.cadence.clone());
        let mut failures = 0;
        while parent.is_alive().await {
            sleep(self.poll_interval).await;
            if !ticker.due() {
                continue;
            }
            let reason = match self.coordination.get_job_status(&self.job).await {
                Ok(JobStatus::Running) => {
                    failures = 0;
                    continue;
                }
                Ok(status) => format!("job status changed to {status}"),
                Err(e) => {
                    failures += 1;
                    warn!(
                        "Status check {failures}/{} for job {} failed: {e:#}",
                        self.max_consecutive_failures, self.job.job_id
                    );
                    if failures < self.max_consecutive_failures {
                        continue;
                    }
                    format!("unable to check job status: {e}")
                }
            };
            info!("Canceling job {}: {reason}", self.job.job_id);
            if let Err(e) = self.markers.put(CANCEL_MARKER_KEY, &reason).await {
                warn!("Unable to write cancel marker for job {}: {e:#}", self.job.job_id);
            }
            return Some(reason);
        }
        None
    }
}
