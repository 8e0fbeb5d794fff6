use std::sync::Arc;

use async_trait::async_trait;
use domain_compute::{
    model::{
        entity::Job,
        vo::{DispatchMode, JobStatus, RunMethod},
    },
    service::{BackendManager, CoordinationService, JobDispatchService},
};
use tracing::info;
use typed_builder::TypedBuilder;

use super::fail_job;
use crate::AttemptTracker;

/// Admission control with a fixed concurrency ceiling, used by the local and
/// cloud batch run methods.
#[derive(TypedBuilder)]
pub struct CapacityBackendManager {
    run_method: RunMethod,
    max_simultaneous: usize,
    dispatcher: Arc<dyn JobDispatchService>,
    coordination: Arc<dyn CoordinationService>,
    tracker: Arc<AttemptTracker>,
}

#[async_trait]
impl BackendManager for CapacityBackendManager {
    fn run_method(&self) -> RunMethod {
        self.run_method
    }

    async fn handle_jobs(&self, jobs: Vec<Job>) -> anyhow::Result<()> {
        let running = jobs.iter().filter(|job| job.status != JobStatus::Pending).count();
        if running >= self.max_simultaneous {
            return Ok(());
        }
        let mut pending: Vec<&Job> =
            jobs.iter().filter(|job| job.status == JobStatus::Pending).collect();
        pending.sort_by(|a, b| a.cmp_created(b));
        for job in pending.into_iter().take(self.max_simultaneous - running) {
            self.start(job).await;
        }
        Ok(())
    }
}

impl CapacityBackendManager {
    async fn start(&self, job: &Job) {
        if !self.tracker.mark_started(&job.job_id) {
            return;
        }
        match self.dispatcher.start_job(job, DispatchMode::Detach).await {
            Ok(outcome) => info!("Started {} job {}: {outcome:?}", self.run_method, job.job_id),
            Err(e) => {
                fail_job(self.coordination.as_ref(), &self.tracker, job, &e.to_string()).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use domain_compute::{
        exception::ComputeException, mock::prelude::*, model::vo::DispatchOutcome,
    };
    use mockall::predicate::*;

    use super::*;

    fn job(id: &str, status: JobStatus, created: f64) -> Job {
        Job::builder()
            .job_id(id)
            .status(status)
            .run_method(Some(RunMethod::Local))
            .processor_name("p")
            .timestamp_created(created)
            .build()
    }

    fn recording_dispatcher(started: Arc<Mutex<Vec<String>>>) -> MockJobDispatchService {
        let mut dispatcher = MockJobDispatchService::new();
        dispatcher.expect_start_job().returning(move |job, mode| {
            assert_eq!(mode, DispatchMode::Detach);
            started.lock().unwrap().push(job.job_id.clone());
            Ok(DispatchOutcome::Spawned { pid: Some(1) })
        });
        dispatcher
    }

    fn manager(
        cap: usize,
        dispatcher: MockJobDispatchService,
        coordination: MockCoordinationService,
    ) -> CapacityBackendManager {
        CapacityBackendManager::builder()
            .run_method(RunMethod::Local)
            .max_simultaneous(cap)
            .dispatcher(Arc::new(dispatcher))
            .coordination(Arc::new(coordination))
            .tracker(Arc::new(AttemptTracker::new()))
            .build()
    }

    #[tokio::test]
    async fn test_starts_oldest_within_capacity() {
        let started = Arc::new(Mutex::new(Vec::new()));
        let manager = manager(
            3,
            recording_dispatcher(started.clone()),
            MockCoordinationService::new(),
        );
        let jobs = vec![
            job("running", JobStatus::Running, 0.0),
            job("newest", JobStatus::Pending, 30.0),
            job("oldest", JobStatus::Pending, 10.0),
            job("middle", JobStatus::Pending, 20.0),
        ];
        manager.handle_jobs(jobs).await.unwrap();
        assert_eq!(*started.lock().unwrap(), vec!["oldest", "middle"]);
    }

    #[tokio::test]
    async fn test_full_backend_starts_nothing() {
        let mut dispatcher = MockJobDispatchService::new();
        dispatcher.expect_start_job().never();
        let manager = manager(2, dispatcher, MockCoordinationService::new());
        let jobs = vec![
            job("a", JobStatus::Starting, 0.0),
            job("b", JobStatus::Queued, 1.0),
            job("c", JobStatus::Pending, 2.0),
        ];
        manager.handle_jobs(jobs).await.unwrap();
    }

    #[tokio::test]
    async fn test_repeated_ticks_dispatch_once() {
        let started = Arc::new(Mutex::new(Vec::new()));
        let manager = manager(
            2,
            recording_dispatcher(started.clone()),
            MockCoordinationService::new(),
        );
        let jobs = vec![job("a", JobStatus::Pending, 0.0)];
        for _ in 0..3 {
            manager.handle_jobs(jobs.clone()).await.unwrap();
        }
        assert_eq!(*started.lock().unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_dispatch_error_fails_job() {
        let mut dispatcher = MockJobDispatchService::new();
        dispatcher.expect_start_job().times(1).returning(|job, _| {
            Err(ComputeException::AppNotFound {
                processor: job.processor_name.clone(),
            })
        });
        let mut coordination = MockCoordinationService::new();
        coordination
            .expect_set_job_status()
            .with(
                always(),
                eq(JobStatus::Failed),
                eq(Some("could not find app for processor: p".to_string())),
                eq(false),
            )
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        let manager = manager(2, dispatcher, coordination);
        let jobs = vec![job("a", JobStatus::Pending, 0.0)];
        manager.handle_jobs(jobs.clone()).await.unwrap();
        manager.handle_jobs(jobs).await.unwrap();
    }
}
