use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use domain_compute::{
    mock::prelude::*,
    model::{
        entity::{App, Job, JobCredentials},
        vo::{env, AppSpec, JobStatus, LaunchSpec, ProcessorSpec, RequiredResources, RunMethod},
    },
    service::{BackendManager, BackgroundService, ProcessHandle},
};
use service_compute::{
    AttemptTracker, CapacityBackendManager, ChildCommand, DispatchSettings,
    JobDispatchServiceImpl, JobRunContext, JobRunnerService, LoopTiming, OrchestrationService,
};

type StatusLog = Arc<Mutex<Vec<(String, JobStatus)>>>;

fn local_job(id: &str, created: f64) -> Job {
    Job::builder()
        .job_id(id)
        .job_private_key(format!("{id}-key"))
        .status(JobStatus::Pending)
        .run_method(Some(RunMethod::Local))
        .required_resources(Some(RequiredResources {
            cpu_count: 1,
            gpu_count: 0,
            memory_gb: 1.0,
            time_limit_sec: 3600.0,
        }))
        .processor_name("hello")
        .timestamp_created(created)
        .build()
}

fn recording_coordination(statuses: StatusLog) -> MockCoordinationService {
    let mut coordination = MockCoordinationService::new();
    // Listed newest first; the backend must start the oldest first.
    coordination
        .expect_get_unfinished_jobs()
        .returning(|| Ok(vec![local_job("second", 2.0), local_job("first", 1.0)]));
    coordination
        .expect_set_job_status()
        .returning(move |job, status, _, _| {
            statuses.lock().unwrap().push((job.job_id.clone(), status));
            Ok(())
        });
    coordination
}

fn registry() -> MockAppRegistryService {
    let app = App::new(
        "https://example.org/hello.json",
        AppSpec {
            name: "hello".into(),
            app_executable: "/app/hello".into(),
            processors: vec![ProcessorSpec {
                name: "hello".into(),
                ..Default::default()
            }],
            ..Default::default()
        },
    );
    let mut registry = MockAppRegistryService::new();
    registry.expect_refresh().returning(|| Ok(false));
    registry
        .expect_find_app_for_processor()
        .returning(move |_| Some(app.clone()));
    registry
}

/// Records detached wrapper launches; owned children exit at once with 0.
fn launcher(detached: Arc<Mutex<Vec<LaunchSpec>>>) -> MockProcessLauncher {
    let mut launcher = MockProcessLauncher::new();
    launcher.expect_spawn_detached().returning(move |spec| {
        let mut detached = detached.lock().unwrap();
        detached.push(spec.clone());
        Ok(Some(1000 + detached.len() as u32))
    });
    launcher.expect_spawn().returning(|_| {
        let mut child = MockProcessHandle::new();
        child.expect_try_exit_code().returning(|| Ok(Some(0)));
        child.expect_is_alive().returning(|| false);
        Ok(Box::new(child) as Box<dyn ProcessHandle>)
    });
    launcher
}

#[tokio::test]
async fn test_two_local_jobs_run_to_completion_in_creation_order() {
    let jobs_dir = tempfile::tempdir().unwrap();
    let statuses: StatusLog = Arc::new(Mutex::new(Vec::new()));
    let detached = Arc::new(Mutex::new(Vec::new()));
    let coordination = Arc::new(recording_coordination(statuses.clone()));
    let registry = Arc::new(registry());
    let launcher = Arc::new(launcher(detached.clone()));
    let tracker = Arc::new(AttemptTracker::new());

    let dispatcher = Arc::new(
        JobDispatchServiceImpl::builder()
            .settings(
                DispatchSettings::builder()
                    .jobs_dir(jobs_dir.path())
                    .agent_executable("/usr/local/bin/compute-resource-agent")
                    .build(),
            )
            .app_registry(registry.clone())
            .coordination(coordination.clone())
            .launcher(launcher.clone())
            .build(),
    );
    let local: Arc<dyn BackendManager> = Arc::new(
        CapacityBackendManager::builder()
            .run_method(RunMethod::Local)
            .max_simultaneous(2)
            .dispatcher(dispatcher)
            .coordination(coordination.clone())
            .tracker(tracker.clone())
            .build(),
    );
    let (_sender, receiver) = flume::unbounded();
    let orchestration = OrchestrationService::builder()
        .coordination(coordination.clone())
        .app_registry(registry)
        .backends(vec![local])
        .tracker(tracker)
        .wake_ups(receiver)
        .timing(
            LoopTiming::builder()
                .min_sleep(Duration::from_millis(10))
                .max_sleep(Duration::from_millis(10))
                .build(),
        )
        .timeout(Some(Duration::from_millis(300)))
        .build();
    orchestration.run().await;

    let wrappers = detached.lock().unwrap().clone();
    let started: Vec<&str> = wrappers.iter().map(|spec| spec.env[env::JOB_ID].as_str()).collect();
    assert_eq!(started, vec!["first", "second"]);

    // Play the part of each detached `run-job` process.
    let runner = JobRunnerService::builder()
        .coordination(coordination.clone())
        .launcher(launcher)
        .markers(Arc::new({
            let mut markers = MockKeyValueStore::new();
            markers.expect_get().returning(|_| Ok(None));
            markers
        }))
        .poll_interval(Duration::from_millis(10))
        .build();
    for spec in wrappers.iter() {
        assert_eq!(spec.args, vec!["run-job"]);
        let cleanup_dir = PathBuf::from(&spec.env[env::JOB_CLEANUP_DIR]);
        let ctx = JobRunContext::builder()
            .job(JobCredentials {
                job_id: spec.env[env::JOB_ID].clone(),
                job_private_key: spec.env[env::JOB_PRIVATE_KEY].clone(),
            })
            .child(
                ChildCommand::builder()
                    .executable(spec.env[env::APP_EXECUTABLE].as_str())
                    .working_dir(&cleanup_dir)
                    .build(),
            )
            .cleanup_dir(&cleanup_dir)
            .offline(true)
            .build();
        runner.run(&ctx).await.unwrap();
    }

    let statuses = statuses.lock().unwrap();
    for id in ["first", "second"] {
        let sequence: Vec<JobStatus> = statuses
            .iter()
            .filter(|(job_id, _)| job_id == id)
            .map(|(_, status)| *status)
            .collect();
        assert_eq!(
            sequence,
            vec![JobStatus::Starting, JobStatus::Running, JobStatus::Completed],
            "status sequence of {id}"
        );
    }
    let starts: Vec<&str> = statuses
        .iter()
        .filter(|(_, status)| *status == JobStatus::Starting)
        .map(|(job_id, _)| job_id.as_str())
        .collect();
    assert_eq!(starts, vec!["first", "second"]);
}
