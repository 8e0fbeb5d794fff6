use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use domain_compute::{
    exception::{ComputeException, ComputeResult},
    model::{
        entity::{App, Job},
        vo::{
            env, ContainerRuntime, DispatchMode, DispatchOutcome, ExecutionMode, JobStatus,
            LaunchSpec, RequiredResources,
        },
    },
    service::{
        AppRegistryService, CloudBatchService, CloudBatchSubmission, CoordinationService,
        JobDispatchService, ProcessLauncher,
    },
};
use tracing::info;
use typed_builder::TypedBuilder;

use crate::runner::INTERNAL_DIR_NAME;

#[derive(Clone, Debug, TypedBuilder)]
pub struct DispatchSettings {
    /// Parent of every per-job working directory.
    #[builder(setter(into))]
    pub jobs_dir: PathBuf,
    /// Binary providing the `run-job` wrapper.
    #[builder(setter(into))]
    pub agent_executable: PathBuf,
    #[builder(default)]
    pub container_runtime: Option<ContainerRuntime>,
    #[builder(default)]
    pub batch_enabled: bool,
    /// Added to the job's limit for the server-side cloud batch timeout.
    #[builder(default = Duration::from_secs(600))]
    pub batch_timeout_buffer: Duration,
    /// Forwarded to every job, e.g. the coordination API url.
    #[builder(default)]
    pub passthrough_env: BTreeMap<String, String>,
}

#[derive(TypedBuilder)]
pub struct JobDispatchServiceImpl {
    settings: DispatchSettings,
    app_registry: Arc<dyn AppRegistryService>,
    coordination: Arc<dyn CoordinationService>,
    launcher: Arc<dyn ProcessLauncher>,
    #[builder(default)]
    cloud_batch: Option<Arc<dyn CloudBatchService>>,
}

#[async_trait]
impl JobDispatchService for JobDispatchServiceImpl {
    async fn start_job(&self, job: &Job, mode: DispatchMode) -> ComputeResult<DispatchOutcome> {
        let run_method = job.run_method.ok_or(ComputeException::RunMethodNone)?;
        let resources = job.required_resources.ok_or(ComputeException::RequiredResourcesNone)?;
        let app = self
            .app_registry
            .find_app_for_processor(&job.processor_name)
            .await
            .ok_or_else(|| ComputeException::AppNotFound {
                processor: job.processor_name.clone(),
            })?;

        self.coordination
            .set_job_status(&job.credentials(), JobStatus::Starting, None, false)
            .await
            .with_context(|| format!("Unable to mark job {} as starting", job.job_id))?;

        let execution = ExecutionMode::resolve(
            &app,
            run_method,
            self.settings.batch_enabled && self.cloud_batch.is_some(),
            self.settings.container_runtime,
        )?;
        match execution {
            ExecutionMode::CloudBatch { image, executable } => {
                self.submit_cloud_batch(job, &app, &image, &executable, resources).await
            }
            execution => self.start_wrapper(job, &execution, resources, mode).await,
        }
    }
}

impl JobDispatchServiceImpl {
    fn job_env(
        &self,
        job: &Job,
        executable: &str,
        resources: RequiredResources,
    ) -> BTreeMap<String, String> {
        let mut vars = self.settings.passthrough_env.clone();
        vars.insert(env::JOB_ID.into(), job.job_id.clone());
        vars.insert(env::JOB_PRIVATE_KEY.into(), job.job_private_key.clone());
        vars.insert(env::APP_EXECUTABLE.into(), executable.to_string());
        if let Some(limit) = resources.time_limit() {
            vars.insert(env::JOB_TIMEOUT_SEC.into(), limit.as_secs_f64().ceil().to_string());
        }
        vars
    }

    async fn submit_cloud_batch(
        &self,
        job: &Job,
        app: &App,
        image: &str,
        executable: &str,
        resources: RequiredResources,
    ) -> ComputeResult<DispatchOutcome> {
        let cloud_batch = self
            .cloud_batch
            .as_ref()
            .context("Cloud batch run method is not configured")?;
        let job_definition = cloud_batch.job_definition_name(app.name());
        match cloud_batch.job_definition_image(&job_definition).await? {
            None => return Err(ComputeException::JobDefinitionMissing { job_definition }),
            Some(actual) if actual != image => {
                return Err(ComputeException::ImageMismatch {
                    job_definition,
                    expected: image.to_string(),
                    actual,
                })
            }
            Some(_) => {}
        }
        let limit = resources.time_limit().ok_or(ComputeException::InvalidTimeLimit {
            time_limit_sec: resources.time_limit_sec,
        })?;
        let submission = CloudBatchSubmission {
            job_name: format!("job-{}", job.job_id),
            job_definition,
            env: self.job_env(job, executable, resources),
            resources,
            timeout: limit + self.settings.batch_timeout_buffer,
        };
        let batch_job_id = cloud_batch.submit_job(&submission).await?;
        info!("Submitted job {} to cloud batch as {batch_job_id}", job.job_id);
        Ok(DispatchOutcome::Submitted { batch_job_id })
    }

    async fn start_wrapper(
        &self,
        job: &Job,
        execution: &ExecutionMode,
        resources: RequiredResources,
        mode: DispatchMode,
    ) -> ComputeResult<DispatchOutcome> {
        let job_dir = self.settings.jobs_dir.join(&job.job_id);
        let internal_dir = job_dir.join(INTERNAL_DIR_NAME);
        tokio::fs::create_dir_all(&internal_dir)
            .await
            .with_context(|| format!("Unable to create {}", internal_dir.display()))?;

        let job_dir_str = job_dir.to_string_lossy().to_string();
        let mut spec = LaunchSpec::new(self.settings.agent_executable.to_string_lossy())
            .arg("run-job")
            .working_dir(&job_dir)
            .env(env::JOB_CLEANUP_DIR, &job_dir_str)
            .env(env::JOB_WORKING_DIR, &job_dir_str);
        spec.env.extend(self.job_env(job, execution.executable(), resources));
        if let ExecutionMode::Container { image, runtime, .. } = execution {
            spec = spec
                .env(env::APP_IMAGE, image)
                .env(env::CONTAINER_METHOD, runtime.program());
        }

        match mode {
            DispatchMode::ShellCommand => {
                Ok(DispatchOutcome::ShellCommand(spec.to_shell_command()))
            }
            DispatchMode::Detach => {
                let spec = spec.output(internal_dir.join("wrapper_output.txt"));
                let pid = self.launcher.spawn_detached(&spec).await?;
                info!("Started job {} in {job_dir_str} (pid {pid:?})", job.job_id);
                Ok(DispatchOutcome::Spawned { pid })
            }
        }
    }
}

/// The app process started by the job wrapper.
#[derive(Clone, Debug, TypedBuilder)]
pub struct ChildCommand {
    #[builder(setter(into))]
    pub executable: String,
    #[builder(default, setter(strip_option, into))]
    pub image: Option<String>,
    #[builder(default)]
    pub runtime: Option<ContainerRuntime>,
    /// Expose host GPUs to the container.
    #[builder(default)]
    pub gpu: bool,
    #[builder(setter(into))]
    pub working_dir: PathBuf,
    #[builder(default)]
    pub env: BTreeMap<String, String>,
}

impl ChildCommand {
    /// Scratch directory bound to `/tmp` inside containers.
    pub fn scratch_dir(&self) -> PathBuf {
        self.working_dir.join("tmp")
    }

    pub fn launch_spec(&self, output: &Path) -> ComputeResult<LaunchSpec> {
        let image = match self.image.as_deref().filter(|image| !image.is_empty()) {
            None => {
                let mut spec = LaunchSpec::new(&self.executable)
                    .working_dir(&self.working_dir)
                    .output(output);
                spec.env = self.env.clone();
                return Ok(spec);
            }
            Some(image) => image,
        };
        let runtime = self.runtime.ok_or_else(|| ComputeException::NoContainerRuntime {
            image: image.to_string(),
        })?;
        let work = self.working_dir.to_string_lossy();
        let scratch = self.scratch_dir();
        let scratch = scratch.to_string_lossy();
        let spec = LaunchSpec::new(runtime.program())
            .working_dir(&self.working_dir)
            .output(output);
        let spec = match runtime {
            ContainerRuntime::Docker => {
                let mut spec = spec.args(["run", "--rm"]);
                spec = spec
                    .arg("-v")
                    .arg(format!("{work}:{work}"))
                    .arg("-v")
                    .arg(format!("{scratch}:/tmp"))
                    .arg("-w")
                    .arg(work.to_string());
                if self.gpu {
                    spec = spec.args(["--gpus", "all"]);
                }
                for (k, v) in self.env.iter() {
                    spec = spec.arg("-e").arg(format!("{k}={v}"));
                }
                spec.arg(image).arg(&self.executable)
            }
            ContainerRuntime::Singularity => {
                let mut spec = spec.args(["exec", "--contain", "--cleanenv"]);
                spec = spec
                    .arg("--bind")
                    .arg(format!("{work}:{work}"))
                    .arg("--bind")
                    .arg(format!("{scratch}:/tmp"))
                    .arg("--pwd")
                    .arg(work.to_string());
                if self.gpu {
                    spec = spec.arg("--nv");
                }
                for (k, v) in self.env.iter() {
                    spec = spec.arg("--env").arg(format!("{k}={v}"));
                }
                spec.arg(format!("docker://{image}")).arg(&self.executable)
            }
        };
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use domain_compute::{
        mock::prelude::*,
        model::vo::{AppSpec, ProcessorSpec, RunMethod},
    };
    use mockall::predicate::*;

    use super::*;

    fn app(image: Option<&str>) -> App {
        App::new(
            "file:///apps/a.json",
            AppSpec {
                name: "a".into(),
                app_image: image.map(str::to_string),
                app_executable: "/app/main".into(),
                processors: vec![ProcessorSpec {
                    name: "proc".into(),
                    ..Default::default()
                }],
                ..Default::default()
            },
        )
    }

    fn job(run_method: RunMethod) -> Job {
        Job::builder()
            .job_id("j1")
            .job_private_key("secret")
            .run_method(Some(run_method))
            .required_resources(Some(RequiredResources {
                cpu_count: 2,
                gpu_count: 0,
                memory_gb: 4.0,
                time_limit_sec: 100.0,
            }))
            .processor_name("proc")
            .build()
    }

    fn registry(app: Option<App>) -> MockAppRegistryService {
        let mut registry = MockAppRegistryService::new();
        registry
            .expect_find_app_for_processor()
            .returning(move |_| app.clone());
        registry
    }

    fn starting_coordination() -> MockCoordinationService {
        let mut coordination = MockCoordinationService::new();
        coordination
            .expect_set_job_status()
            .with(always(), eq(JobStatus::Starting), eq(None), eq(false))
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        coordination
    }

    fn settings(jobs_dir: &Path) -> DispatchSettings {
        DispatchSettings::builder()
            .jobs_dir(jobs_dir)
            .agent_executable("/usr/bin/compute-resource-agent")
            .container_runtime(Some(ContainerRuntime::Docker))
            .batch_enabled(true)
            .build()
    }

    #[tokio::test]
    async fn test_missing_preconditions() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordination = MockCoordinationService::new();
        coordination.expect_set_job_status().never();
        let dispatcher = JobDispatchServiceImpl::builder()
            .settings(settings(dir.path()))
            .app_registry(Arc::new(registry(None)))
            .coordination(Arc::new(coordination))
            .launcher(Arc::new(MockProcessLauncher::new()))
            .build();

        let mut no_resources = job(RunMethod::Local);
        no_resources.required_resources = None;
        assert!(matches!(
            dispatcher.start_job(&no_resources, DispatchMode::Detach).await,
            Err(ComputeException::RequiredResourcesNone)
        ));
        let err = dispatcher
            .start_job(&job(RunMethod::Local), DispatchMode::Detach)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "could not find app for processor: proc");
    }

    #[tokio::test]
    async fn test_detached_local_job() {
        let dir = tempfile::tempdir().unwrap();
        let launched = Arc::new(Mutex::new(None));
        let mut launcher = MockProcessLauncher::new();
        {
            let launched = launched.clone();
            launcher.expect_spawn_detached().times(1).returning(move |spec| {
                *launched.lock().unwrap() = Some(spec.clone());
                Ok(Some(42))
            });
        }
        let dispatcher = JobDispatchServiceImpl::builder()
            .settings(settings(dir.path()))
            .app_registry(Arc::new(registry(Some(app(None)))))
            .coordination(Arc::new(starting_coordination()))
            .launcher(Arc::new(launcher))
            .build();

        let outcome = dispatcher
            .start_job(&job(RunMethod::Local), DispatchMode::Detach)
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Spawned { pid: Some(42) });

        let spec = launched.lock().unwrap().clone().unwrap();
        let job_dir = dir.path().join("j1");
        assert_eq!(spec.args, vec!["run-job"]);
        assert_eq!(spec.working_dir.as_deref(), Some(job_dir.as_path()));
        assert_eq!(spec.env[env::JOB_ID], "j1");
        assert_eq!(spec.env[env::JOB_PRIVATE_KEY], "secret");
        assert_eq!(spec.env[env::APP_EXECUTABLE], "/app/main");
        assert_eq!(spec.env[env::JOB_TIMEOUT_SEC], "100");
        assert!(!spec.env.contains_key(env::APP_IMAGE));
        assert!(job_dir.join(INTERNAL_DIR_NAME).is_dir());
    }

    #[tokio::test]
    async fn test_shell_command_for_hpc() {
        let dir = tempfile::tempdir().unwrap();
        let mut launcher = MockProcessLauncher::new();
        launcher.expect_spawn_detached().never();
        let dispatcher = JobDispatchServiceImpl::builder()
            .settings(settings(dir.path()))
            .app_registry(Arc::new(registry(Some(app(Some("img:1"))))))
            .coordination(Arc::new(starting_coordination()))
            .launcher(Arc::new(launcher))
            .build();

        let outcome = dispatcher
            .start_job(&job(RunMethod::Hpc), DispatchMode::ShellCommand)
            .await
            .unwrap();
        let DispatchOutcome::ShellCommand(command) = outcome else {
            panic!("expected a shell command, got {outcome:?}");
        };
        assert!(command.contains("APP_IMAGE=img:1"));
        assert!(command.contains("CONTAINER_METHOD=docker"));
        assert!(command.ends_with("/usr/bin/compute-resource-agent run-job"));
    }

    #[tokio::test]
    async fn test_cloud_batch_image_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut cloud_batch = MockCloudBatchService::new();
        cloud_batch
            .expect_job_definition_name()
            .returning(|name| format!("dendro-{name}"));
        cloud_batch
            .expect_job_definition_image()
            .withf(|job_definition| job_definition == "dendro-a")
            .returning(|_| Ok(Some("img:0".to_string())));
        cloud_batch.expect_submit_job().never();
        let dispatcher = JobDispatchServiceImpl::builder()
            .settings(settings(dir.path()))
            .app_registry(Arc::new(registry(Some(app(Some("img:1"))))))
            .coordination(Arc::new(starting_coordination()))
            .launcher(Arc::new(MockProcessLauncher::new()))
            .cloud_batch(Some(Arc::new(cloud_batch) as Arc<dyn CloudBatchService>))
            .build();

        let err = dispatcher
            .start_job(&job(RunMethod::Batch), DispatchMode::Detach)
            .await
            .unwrap_err();
        assert!(matches!(err, ComputeException::ImageMismatch { .. }));
    }

    #[tokio::test]
    async fn test_cloud_batch_submission() {
        let dir = tempfile::tempdir().unwrap();
        let mut cloud_batch = MockCloudBatchService::new();
        cloud_batch
            .expect_job_definition_name()
            .returning(|name| format!("dendro-{name}"));
        cloud_batch
            .expect_job_definition_image()
            .returning(|_| Ok(Some("img:1".to_string())));
        cloud_batch
            .expect_submit_job()
            .withf(|s| {
                s.job_definition == "dendro-a"
                    && s.timeout == Duration::from_secs(700)
                    && s.env[env::JOB_ID] == "j1"
            })
            .times(1)
            .returning(|_| Ok("batch-123".to_string()));
        let dispatcher = JobDispatchServiceImpl::builder()
            .settings(settings(dir.path()))
            .app_registry(Arc::new(registry(Some(app(Some("img:1"))))))
            .coordination(Arc::new(starting_coordination()))
            .launcher(Arc::new(MockProcessLauncher::new()))
            .cloud_batch(Some(Arc::new(cloud_batch) as Arc<dyn CloudBatchService>))
            .build();

        let outcome = dispatcher
            .start_job(&job(RunMethod::Batch), DispatchMode::Detach)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Submitted {
                batch_job_id: "batch-123".into()
            }
        );
    }

    #[test]
    fn test_docker_child_command() {
        let child = ChildCommand::builder()
            .executable("/app/main")
            .image("img:1")
            .runtime(Some(ContainerRuntime::Docker))
            .working_dir("/w/j1")
            .env(BTreeMap::from([("JOB_ID".to_string(), "j1".to_string())]))
            .build();
        let spec = child.launch_spec(Path::new("/w/j1/_internal/out.txt")).unwrap();
        assert_eq!(spec.program, "docker");
        assert_eq!(
            spec.args,
            vec![
                "run", "--rm", "-v", "/w/j1:/w/j1", "-v", "/w/j1/tmp:/tmp", "-w", "/w/j1", "-e",
                "JOB_ID=j1", "img:1", "/app/main"
            ]
        );
        assert!(spec.env.is_empty());
    }

    #[test]
    fn test_bare_child_command_keeps_env() {
        let child = ChildCommand::builder()
            .executable("/app/main")
            .working_dir("/w/j1")
            .env(BTreeMap::from([("JOB_ID".to_string(), "j1".to_string())]))
            .build();
        let spec = child.launch_spec(Path::new("/w/out.txt")).unwrap();
        assert_eq!(spec.program, "/app/main");
        assert!(spec.args.is_empty());
        assert_eq!(spec.env["JOB_ID"], "j1");
    }

    #[test]
    fn test_image_without_runtime() {
        let child = ChildCommand::builder()
            .executable("/app/main")
            .image("img:1")
            .working_dir("/w/j1")
            .build();
        assert!(matches!(
            child.launch_spec(Path::new("/w/out.txt")),
            Err(ComputeException::NoContainerRuntime { .. })
        ));
    }
}
