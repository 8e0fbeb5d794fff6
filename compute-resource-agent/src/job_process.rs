//! Entrypoints of the processes the daemon detaches for every job: the
//! wrapper that owns the app process and the monitors beside it.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use colored::Colorize;
use domain_compute::{
    exception::{ComputeException, ComputeResult},
    model::{
        entity::JobCredentials,
        vo::{env, ContainerRuntime, LaunchSpec},
    },
    service::CoordinationService,
};
use service_compute::{
    CancellationMonitor, ChildCommand, ConsoleOutputMonitor, JobRunContext, JobRunnerService,
    ResourceUtilizationMonitor, INTERNAL_DIR_NAME,
};
use tracing::{info, warn};

use crate::config::AgentConfig;
use crate::infrastructure::{
    http_client::CoordinationClient, key_value_store::FileKeyValueStore,
    process::{PidHandle, TokioProcessLauncher},
    system_sampler::ProcSystemSampler,
};
use crate::telemetry::{initialize_telemetry, TelemetryConfig};

const MARKERS_DIR_NAME: &str = "markers";
const MONITOR_OUTPUT_FILE: &str = "monitor_output.txt";
const RESOURCE_LOG_FILE: &str = "resource_utilization_log.jsonl";

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum MonitorKind {
    Console,
    Resources,
    Cancellation,
}

impl MonitorKind {
    fn name(&self) -> &'static str {
        match self {
            MonitorKind::Console => "console",
            MonitorKind::Resources => "resources",
            MonitorKind::Cancellation => "cancellation",
        }
    }
}

/// What a job process learns from its environment.
#[derive(Clone, Debug)]
pub struct JobEnvironment {
    pub job: JobCredentials,
    pub executable: String,
    pub image: Option<String>,
    pub runtime: Option<ContainerRuntime>,
    pub cleanup_dir: PathBuf,
    pub working_dir: PathBuf,
    pub timeout: Option<Duration>,
    pub offline: bool,
    pub api_url: String,
}

impl JobEnvironment {
    pub fn from_env() -> ComputeResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ComputeResult<Self> {
        let get = |name: &str| lookup(name).filter(|value| !value.is_empty());
        let required = |name: &str| {
            get(name).ok_or_else(|| ComputeException::MissingEnvironment {
                name: name.to_string(),
            })
        };
        let cleanup_dir = PathBuf::from(required(env::JOB_CLEANUP_DIR)?);
        let runtime = get(env::CONTAINER_METHOD)
            .map(|method| method.parse::<ContainerRuntime>())
            .transpose()?;
        let timeout = match get(env::JOB_TIMEOUT_SEC) {
            Some(value) => {
                let seconds: f64 = value
                    .parse()
                    .with_context(|| format!("Invalid {}: {value}", env::JOB_TIMEOUT_SEC))?;
                (seconds > 0.0).then(|| Duration::from_secs_f64(seconds))
            }
            None => None,
        };
        Ok(Self {
            job: JobCredentials {
                job_id: required(env::JOB_ID)?,
                job_private_key: required(env::JOB_PRIVATE_KEY)?,
            },
            executable: required(env::APP_EXECUTABLE)?,
            image: get(env::APP_IMAGE),
            runtime,
            working_dir: get(env::JOB_WORKING_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|| cleanup_dir.clone()),
            cleanup_dir,
            timeout,
            offline: get(env::JOB_OFFLINE)
                .is_some_and(|value| value == "1" || value.eq_ignore_ascii_case("true")),
            api_url: get(env::COORDINATION_API_URL).unwrap_or_else(AgentConfig::default_api_url),
        })
    }

    pub fn internal_dir(&self) -> PathBuf {
        self.cleanup_dir.join(INTERNAL_DIR_NAME)
    }

    /// Variables handed on to the app process.
    pub fn child_env(&self) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::from([
            (env::JOB_ID.to_string(), self.job.job_id.clone()),
            (env::JOB_PRIVATE_KEY.to_string(), self.job.job_private_key.clone()),
            (env::APP_EXECUTABLE.to_string(), self.executable.clone()),
            (env::COORDINATION_API_URL.to_string(), self.api_url.clone()),
            (
                env::JOB_CLEANUP_DIR.to_string(),
                self.cleanup_dir.to_string_lossy().into_owned(),
            ),
            (
                env::JOB_WORKING_DIR.to_string(),
                self.working_dir.to_string_lossy().into_owned(),
            ),
        ]);
        if let Some(timeout) = self.timeout {
            vars.insert(env::JOB_TIMEOUT_SEC.to_string(), timeout.as_secs_f64().to_string());
        }
        vars
    }

    /// The wrapper's view of the job; `gpu` exposes host GPUs to containers.
    pub fn run_context(&self, gpu: bool) -> JobRunContext {
        let child = ChildCommand {
            executable: self.executable.clone(),
            image: self.image.clone(),
            runtime: self.runtime,
            gpu,
            working_dir: self.working_dir.clone(),
            env: self.child_env(),
        };
        JobRunContext::builder()
            .job(self.job.clone())
            .child(child)
            .cleanup_dir(self.cleanup_dir.clone())
            .timeout(self.timeout)
            .offline(self.offline)
            .build()
    }

    fn coordination(&self) -> anyhow::Result<Arc<dyn CoordinationService>> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Arc::new(CoordinationClient::new(
            Arc::new(client),
            self.api_url.clone(),
            None,
        )))
    }

    fn markers(&self) -> Arc<FileKeyValueStore> {
        Arc::new(FileKeyValueStore::new(
            self.internal_dir().join(MARKERS_DIR_NAME),
        ))
    }

    fn init_logging(&self, prefix: &str) {
        let config = TelemetryConfig::job_process(&self.internal_dir(), prefix);
        if let Err(e) = initialize_telemetry(&config) {
            eprintln!("{}: {e}", "Failed to initialize logger".red());
        }
    }
}

/// `run-job`: start the app, supervise it, report the outcome.
pub async fn run_job() -> ComputeResult<()> {
    let environment = JobEnvironment::from_env()?;
    tokio::fs::create_dir_all(environment.internal_dir())
        .await
        .context("Unable to create the internal directory")?;
    environment.init_logging("job_wrapper.log");
    info!("Wrapping job {}", environment.job.job_id);

    let coordination = environment.coordination()?;
    let gpu = if environment.offline {
        false
    } else {
        match coordination.get_job(&environment.job).await {
            Ok(job) => job.required_resources.is_some_and(|r| r.needs_gpu()),
            Err(e) => {
                warn!("Unable to fetch job {}: {e:#}", environment.job.job_id);
                false
            }
        }
    };

    let ctx = environment.run_context(gpu);
    let agent = std::env::current_exe().context("Unable to locate the agent executable")?;
    let monitor_command = LaunchSpec::new(agent.to_string_lossy())
        .working_dir(&environment.cleanup_dir)
        .output(environment.internal_dir().join(MONITOR_OUTPUT_FILE));
    let runner = JobRunnerService::builder()
        .coordination(coordination)
        .launcher(Arc::new(TokioProcessLauncher))
        .markers(environment.markers())
        .monitor_command(Some(monitor_command))
        .build();
    runner.run(&ctx).await
}

/// `monitor <kind>`: watch the job until `parent_pid` is gone.
pub async fn run_monitor(kind: MonitorKind, parent_pid: u32) -> anyhow::Result<()> {
    let environment = JobEnvironment::from_env()?;
    environment.init_logging(&format!("monitor_{}.log", kind.name()));
    let coordination = environment.coordination()?;
    let parent = PidHandle::new(parent_pid);
    info!("Monitoring {} of job {}", kind.name(), environment.job.job_id);
    match kind {
        MonitorKind::Console => {
            let console_file = environment.run_context(false).console_file();
            ConsoleOutputMonitor::builder()
                .coordination(coordination)
                .job(environment.job.clone())
                .console_file(console_file)
                .build()
                .run(&parent)
                .await;
        }
        MonitorKind::Resources => {
            ResourceUtilizationMonitor::builder()
                .coordination(coordination)
                .sampler(Arc::new(ProcSystemSampler::default()))
                .job(environment.job.clone())
                .log_file(environment.internal_dir().join(RESOURCE_LOG_FILE))
                .build()
                .run(&parent)
                .await;
        }
        MonitorKind::Cancellation => {
            let reason = CancellationMonitor::builder()
                .coordination(coordination)
                .markers(environment.markers())
                .job(environment.job.clone())
                .build()
                .run(&parent)
                .await;
            if let Some(reason) = reason {
                info!("Cancel requested for job {}: {reason}", environment.job.job_id);
            }
        }
    }
    Ok(())
}
