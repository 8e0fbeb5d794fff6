//! Per-job monitors. Each one runs in its own process next to the job
//! wrapper and stops once the wrapper is gone.

mod cancellation;
mod console;
mod resource;

use std::time::Duration;

use domain_compute::{model::entity::JobCredentials, service::CoordinationService};
use tokio::time::Instant;

#[rustfmt::skip]
pub use {
    cancellation::CancellationMonitor,
    console::{coalesce_carriage_returns, ConsoleOutputMonitor, CONSOLE_OUTPUT_NAME},
    resource::{ResourceUtilizationMonitor, RESOURCE_LOG_NAME},
};

/// Interval that grows with the age of the job.
#[derive(Clone, Debug, PartialEq)]
pub struct Cadence {
    /// `(until, every)` pairs, ordered by `until`.
    steps: Vec<(Duration, Duration)>,
    after: Duration,
}

impl Default for Cadence {
    /// 10s for the first minute, 30s until 5 minutes, 60s until 20 minutes,
    /// then 120s.
    fn default() -> Self {
        Self::new(
            vec![
                (Duration::from_secs(60), Duration::from_secs(10)),
                (Duration::from_secs(300), Duration::from_secs(30)),
                (Duration::from_secs(1200), Duration::from_secs(60)),
            ],
            Duration::from_secs(120),
        )
    }
}

impl Cadence {
    pub fn new(mut steps: Vec<(Duration, Duration)>, after: Duration) -> Self {
        steps.sort_by_key(|(until, _)| *until);
        Self { steps, after }
    }

    pub fn fixed(every: Duration) -> Self {
        Self::new(Vec::new(), every)
    }

    pub fn interval_at(&self, elapsed: Duration) -> Duration {
        self.steps
            .iter()
            .find(|(until, _)| elapsed < *until)
            .map_or(self.after, |(_, every)| *every)
    }
}

/// Tells when the next action of a cadence is due.
pub(crate) struct Ticker {
    cadence: Cadence,
    started: Instant,
    last: Instant,
}

impl Ticker {
    pub(crate) fn new(cadence: Cadence) -> Self {
        let now = Instant::now();
        Self {
            cadence,
            started: now,
            last: now,
        }
    }

    pub(crate) fn due(&mut self) -> bool {
        let now = Instant::now();
        let interval = self.cadence.interval_at(now - self.started);
        if now - self.last >= interval {
            self.last = now;
            true
        } else {
            false
        }
    }
}

/// Upload `content` as the job output `output_name` through a presigned url.
pub(crate) async fn upload_output(
    coordination: &dyn CoordinationService,
    job: &JobCredentials,
    output_name: &str,
    content: Vec<u8>,
) -> anyhow::Result<()> {
    let url = coordination.get_upload_url(job, output_name).await?;
    coordination.upload_to_url(&url, content).await
}
