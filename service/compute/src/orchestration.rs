use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain_compute::{
    exception::ComputeException,
    model::{entity::Job, vo::RunMethod},
    service::{AppRegistryService, BackendManager, BackgroundService, CoordinationService},
};
use flume::TryRecvError;
use infrastructure_command::WakeUpMessage;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};
use typed_builder::TypedBuilder;

use crate::{backend::fail_job, AttemptTracker};

#[derive(Clone, Debug, TypedBuilder)]
pub struct LoopTiming {
    /// Unfinished jobs are fetched at least this often without any wake-up.
    #[builder(default = Duration::from_secs(600))]
    pub refresh_interval: Duration,
    /// After startup or a wake-up the loop spins fast for this long.
    #[builder(default = Duration::from_secs(60))]
    pub warm_up: Duration,
    #[builder(default = Duration::from_millis(10))]
    pub min_sleep: Duration,
    #[builder(default = Duration::from_secs(2))]
    pub max_sleep: Duration,
}

impl Default for LoopTiming {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// The daemon's control loop: fetch, route to backends, sleep.
#[derive(TypedBuilder)]
pub struct OrchestrationService {
    coordination: Arc<dyn CoordinationService>,
    app_registry: Arc<dyn AppRegistryService>,
    /// One manager per enabled run method.
    backends: Vec<Arc<dyn BackendManager>>,
    tracker: Arc<AttemptTracker>,
    wake_ups: flume::Receiver<WakeUpMessage>,
    #[builder(default)]
    timing: LoopTiming,
    /// Stop after this long; runs forever when unset.
    #[builder(default)]
    timeout: Option<Duration>,
}

#[async_trait]
impl BackgroundService for OrchestrationService {
    async fn run(&self) {
        let started = Instant::now();
        self.refresh_apps().await;
        let mut last_refresh: Option<Instant> = None;
        let mut last_wake_up = started;
        info!(
            "Orchestration started with run methods: {:?}",
            self.backends.iter().map(|b| b.run_method()).collect::<Vec<_>>()
        );
        loop {
            if self.timeout.is_some_and(|timeout| started.elapsed() >= timeout) {
                info!("Orchestration timeout reached");
                break;
            }

            let mut refresh_jobs = last_refresh
                .map_or(true, |last| last.elapsed() >= self.timing.refresh_interval);
            let mut refresh_apps = false;
            loop {
                match self.wake_ups.try_recv() {
                    Ok(message) => {
                        debug!("Wake-up: {message:?}");
                        last_wake_up = Instant::now();
                        refresh_jobs |= message.requests_job_refresh();
                        refresh_apps |= message.requests_app_refresh();
                    }
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }
            if refresh_apps {
                self.refresh_apps().await;
            }
            if refresh_jobs {
                match self.route_unfinished_jobs().await {
                    Ok(()) => last_refresh = Some(Instant::now()),
                    Err(e) => error!("Unable to fetch unfinished jobs: {e:#}"),
                }
            }
            for backend in self.backends.iter() {
                if let Err(e) = backend.do_work().await {
                    error!("Periodic work of {} backend failed: {e:#}", backend.run_method());
                }
            }

            let pause = if last_wake_up.elapsed() < self.timing.warm_up {
                self.timing.min_sleep
            } else {
                self.timing.max_sleep
            };
            sleep(pause).await;
        }
    }
}

impl OrchestrationService {
    async fn refresh_apps(&self) {
        match self.app_registry.refresh().await {
            Ok(true) => info!("App set changed"),
            Ok(false) => {}
            Err(e) => warn!("Unable to refresh apps: {e:#}"),
        }
    }

    async fn route_unfinished_jobs(&self) -> anyhow::Result<()> {
        let jobs = self.coordination.get_unfinished_jobs().await?;
        let mut by_method: BTreeMap<RunMethod, Vec<Job>> =
            RunMethod::ALL.iter().map(|method| (*method, Vec::new())).collect();
        for job in jobs {
            match job.run_method {
                Some(method) => by_method.entry(method).or_default().push(job),
                None => {
                    let reason = ComputeException::RunMethodNone.to_string();
                    fail_job(self.coordination.as_ref(), &self.tracker, &job, &reason).await
                }
            }
        }
        for backend in self.backends.iter() {
            let jobs = by_method.remove(&backend.run_method()).unwrap_or_default();
            if let Err(e) = backend.handle_jobs(jobs).await {
                error!("{} backend failed to handle jobs: {e:#}", backend.run_method());
            }
        }
        for (method, jobs) in by_method {
            if !jobs.is_empty() {
                debug!("Ignoring {} job(s) of disabled run method {method}", jobs.len());
            }
        }
        Ok(())
    }
}
