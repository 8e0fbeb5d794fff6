use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use compute_resource_agent::infrastructure::key_value_store::FileKeyValueStore;
use domain_compute::{
    mock::prelude::*,
    model::{
        entity::Job,
        vo::{DispatchOutcome, JobStatus, RequiredResources, RunMethod},
    },
    repository::KeyValueStore,
    service::{BackendManager, SystemClock},
};
use service_compute::{AttemptTracker, HpcBackendManager, HpcSettings};

fn job(id: &str, status: JobStatus, batch: &str) -> Job {
    Job::builder()
        .job_id(id)
        .status(status)
        .run_method(Some(RunMethod::Hpc))
        .required_resources(Some(RequiredResources {
            cpu_count: 25,
            gpu_count: 0,
            memory_gb: 4.0,
            time_limit_sec: 600.0,
        }))
        .batch_id(batch)
        .processor_name("p")
        .timestamp_created(id.trim_start_matches('j').parse::<f64>().unwrap())
        .build()
}

#[tokio::test]
async fn test_pack_and_respect_group_ceiling() {
    let dir = tempfile::tempdir().unwrap();
    let markers = Arc::new(FileKeyValueStore::new(dir.path().join("slurm_group_assignments")));

    let dispatched = Arc::new(AtomicUsize::new(0));
    let mut dispatcher = MockJobDispatchService::new();
    let counter = dispatched.clone();
    dispatcher.expect_start_job().returning(move |job, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(DispatchOutcome::ShellCommand(format!("run-job {}", job.job_id)))
    });
    let mut submitter = MockHpcSubmitter::new();
    submitter.expect_submit().times(2).returning(|_| Ok(()));

    let manager = HpcBackendManager::builder()
        .settings(
            HpcSettings::builder()
                .max_simultaneous_groups(2)
                .debounce(Duration::ZERO)
                .scripts_dir(dir.path().join("slurm_scripts"))
                .build(),
        )
        .dispatcher(Arc::new(dispatcher))
        .coordination(Arc::new(MockCoordinationService::new()))
        .submitter(Arc::new(submitter))
        .markers(markers.clone())
        .tracker(Arc::new(AttemptTracker::new()))
        .clock(Arc::new(SystemClock))
        .build();

    let first: Vec<Job> = (0..5)
        .map(|n| job(&format!("j{n}"), JobStatus::Pending, "b1"))
        .collect();
    manager.handle_jobs(first).await.unwrap();
    manager.do_work().await.unwrap();

    assert_eq!(dispatched.load(Ordering::SeqCst), 5);
    let scripts = std::fs::read_dir(dir.path().join("slurm_scripts")).unwrap().count();
    assert_eq!(scripts, 2);
    let mut groups = Vec::new();
    for n in 0..5 {
        groups.push(markers.get(&format!("j{n}")).await.unwrap().unwrap());
    }
    // Four 25-cpu tasks fill a 100-cpu node, the fifth gets its own group.
    assert!(groups[..4].iter().all(|group| *group == groups[0]));
    assert_ne!(groups[4], groups[0]);

    // Both groups are now running, so new work waits.
    let mut second: Vec<Job> = (0..5)
        .map(|n| job(&format!("j{n}"), JobStatus::Running, "b1"))
        .collect();
    second.push(job("j5", JobStatus::Pending, "b2"));
    manager.handle_jobs(second).await.unwrap();
    manager.do_work().await.unwrap();
    assert_eq!(dispatched.load(Ordering::SeqCst), 5);
}
