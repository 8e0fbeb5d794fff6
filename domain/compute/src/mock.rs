use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::mock;

use crate::{
    exception::ComputeResult,
    model::{
        entity::{App, Job, JobCredentials},
        vo::{
            AppDescriptor, AppSpec, ComputeResourceSpec, DispatchMode, DispatchOutcome,
            JobStatus, LaunchSpec, ResourceSample, RunMethod,
        },
    },
    repository::KeyValueStore,
    service::{
        AppLoader, AppRegistryService, BackendManager, Clock, CloudBatchService,
        CloudBatchSubmission, CoordinationService, HpcSubmission, HpcSubmitter,
        JobDispatchService, ProcessHandle, ProcessLauncher, SystemSampler,
    },
};

mock! {
    pub CoordinationService {}
    #[async_trait]
    impl CoordinationService for CoordinationService {
        async fn get_unfinished_jobs(&self) -> anyhow::Result<Vec<Job>>;
        async fn get_apps(&self) -> anyhow::Result<Vec<AppDescriptor>>;
        async fn put_spec(&self, spec: &ComputeResourceSpec) -> anyhow::Result<()>;
        async fn set_job_status(
            &self,
            job: &JobCredentials,
            status: JobStatus,
            error: Option<String>,
            force_update: bool,
        ) -> anyhow::Result<()>;
        async fn get_job_status(&self, job: &JobCredentials) -> anyhow::Result<JobStatus>;
        async fn get_upload_url(&self, job: &JobCredentials, output_name: &str) -> anyhow::Result<String>;
        async fn upload_to_url(&self, url: &str, content: Vec<u8>) -> anyhow::Result<()>;
        async fn get_job(&self, job: &JobCredentials) -> anyhow::Result<Job>;
    }
}

mock! {
    pub AppRegistryService {}
    #[async_trait]
    impl AppRegistryService for AppRegistryService {
        async fn refresh(&self) -> anyhow::Result<bool>;
        async fn find_app_for_processor(&self, processor_name: &str) -> Option<App>;
        async fn loaded_apps(&self) -> Vec<App>;
    }
}

mock! {
    pub AppLoader {}
    #[async_trait]
    impl AppLoader for AppLoader {
        async fn load(&self, spec_uri: &str) -> anyhow::Result<AppSpec>;
    }
}

mock! {
    pub BackendManager {}
    #[async_trait]
    impl BackendManager for BackendManager {
        fn run_method(&self) -> RunMethod;
        async fn handle_jobs(&self, jobs: Vec<Job>) -> anyhow::Result<()>;
        async fn do_work(&self) -> anyhow::Result<()>;
    }
}

mock! {
    pub JobDispatchService {}
    #[async_trait]
    impl JobDispatchService for JobDispatchService {
        async fn start_job(&self, job: &Job, mode: DispatchMode) -> ComputeResult<DispatchOutcome>;
    }
}

mock! {
    pub ProcessHandle {}
    #[async_trait]
    impl ProcessHandle for ProcessHandle {
        fn pid(&self) -> Option<u32>;
        async fn is_alive(&self) -> bool;
        async fn try_exit_code(&self) -> anyhow::Result<Option<i32>>;
        async fn terminate(&self) -> anyhow::Result<()>;
    }
}

mock! {
    pub ProcessLauncher {}
    #[async_trait]
    impl ProcessLauncher for ProcessLauncher {
        async fn spawn(&self, spec: &LaunchSpec) -> anyhow::Result<Box<dyn ProcessHandle>>;
        async fn spawn_detached(&self, spec: &LaunchSpec) -> anyhow::Result<Option<u32>>;
    }
}

mock! {
    pub CloudBatchService {}
    #[async_trait]
    impl CloudBatchService for CloudBatchService {
        fn job_definition_name(&self, app_name: &str) -> String;
        async fn job_definition_image(&self, job_definition: &str) -> anyhow::Result<Option<String>>;
        async fn ensure_job_definition(&self, app_name: &str, image: &str) -> anyhow::Result<()>;
        async fn submit_job(&self, submission: &CloudBatchSubmission) -> anyhow::Result<String>;
    }
}

mock! {
    pub HpcSubmitter {}
    #[async_trait]
    impl HpcSubmitter for HpcSubmitter {
        async fn submit(&self, submission: HpcSubmission) -> anyhow::Result<()>;
    }
}

mock! {
    pub SystemSampler {}
    #[async_trait]
    impl SystemSampler for SystemSampler {
        async fn sample(&self) -> anyhow::Result<ResourceSample>;
    }
}

mock! {
    pub KeyValueStore {}
    #[async_trait]
    impl KeyValueStore for KeyValueStore {
        async fn put(&self, key: &str, value: &str) -> anyhow::Result<()>;
        async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
        async fn delete(&self, key: &str) -> anyhow::Result<()>;
        async fn purge_older_than(&self, max_age: Duration) -> anyhow::Result<usize>;
    }
}

mock! {
    pub Clock {}
    impl Clock for Clock {
        fn now(&self) -> DateTime<Utc>;
    }
}

pub mod prelude {
    #[rustfmt::skip]
    pub use super::{
        MockAppLoader, MockAppRegistryService, MockBackendManager, MockClock,
        MockCloudBatchService, MockCoordinationService, MockHpcSubmitter,
        MockJobDispatchService, MockKeyValueStore, MockProcessHandle, MockProcessLauncher,
        MockSystemSampler,
    };
}
