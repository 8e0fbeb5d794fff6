use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use domain_compute::{
    exception::{ComputeException, ComputeResult},
    model::{
        entity::JobCredentials,
        vo::{JobStatus, LaunchSpec},
    },
    repository::KeyValueStore,
    service::{CoordinationService, ProcessHandle, ProcessLauncher},
};
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};
use typed_builder::TypedBuilder;

use crate::{dispatch::ChildCommand, monitor::ConsoleOutputMonitor};

/// Subdirectory of a job directory that survives cleanup.
pub const INTERNAL_DIR_NAME: &str = "_internal";
/// Written by the cancellation monitor, read by the wrapper.
pub const CANCEL_MARKER_KEY: &str = "cancel";
const CONSOLE_FILE_NAME: &str = "console_output.txt";

/// Monitor processes started next to every online job.
const MONITOR_KINDS: [&str; 3] = ["console", "resources", "cancellation"];

/// Everything the wrapper knows about the job it runs.
#[derive(Clone, Debug, TypedBuilder)]
pub struct JobRunContext {
    pub job: JobCredentials,
    pub child: ChildCommand,
    /// Wiped when the job ends, except for [`INTERNAL_DIR_NAME`].
    #[builder(setter(into))]
    pub cleanup_dir: PathBuf,
    #[builder(default)]
    pub timeout: Option<Duration>,
    /// Skip monitors and uploads.
    #[builder(default)]
    pub offline: bool,
}

impl JobRunContext {
    pub fn internal_dir(&self) -> PathBuf {
        self.cleanup_dir.join(INTERNAL_DIR_NAME)
    }

    pub fn console_file(&self) -> PathBuf {
        self.internal_dir().join(CONSOLE_FILE_NAME)
    }
}

/// The parent process of a job's app process.
#[derive(TypedBuilder)]
pub struct JobRunnerService {
    coordination: Arc<dyn CoordinationService>,
    launcher: Arc<dyn ProcessLauncher>,
    /// Store shared with the cancellation monitor.
    markers: Arc<dyn KeyValueStore>,
    /// Base command of the monitor processes; kind and parent pid are appended.
    #[builder(default)]
    monitor_command: Option<LaunchSpec>,
    #[builder(default = Duration::from_millis(500))]
    poll_interval: Duration,
}

impl JobRunnerService {
    /// Run the job to completion and report its terminal status.
    pub async fn run(&self, ctx: &JobRunContext) -> ComputeResult<()> {
        let mut child = None;
        let result = self.supervise(ctx, &mut child).await;
        if let Some(child) = child {
            stop(child.as_ref()).await;
        }
        if let Err(e) = clean_job_dir(&ctx.cleanup_dir).await {
            warn!("Unable to clean {}: {e:#}", ctx.cleanup_dir.display());
        }
        if !ctx.offline {
            let console = ConsoleOutputMonitor::builder()
                .coordination(self.coordination.clone())
                .job(ctx.job.clone())
                .console_file(ctx.console_file())
                .build();
            if let Err(e) = console.upload().await {
                warn!("Final console upload of job {} failed: {e:#}", ctx.job.job_id);
            }
        }

        let (status, error_text) = match &result {
            Ok(()) => (JobStatus::Completed, None),
            Err(e) => (JobStatus::Failed, Some(e.to_string())),
        };
        info!("Job {} finished: {status}", ctx.job.job_id);
        if let Err(e) = self
            .coordination
            .set_job_status(&ctx.job, status, error_text, false)
            .await
        {
            error!("Unable to report {status} for job {}: {e:#}", ctx.job.job_id);
        }
        result
    }

    async fn supervise(
        &self,
        ctx: &JobRunContext,
        child: &mut Option<Box<dyn ProcessHandle>>,
    ) -> ComputeResult<()> {
        self.coordination
            .set_job_status(&ctx.job, JobStatus::Running, None, false)
            .await
            .context("Unable to mark job as running")?;
        tokio::fs::create_dir_all(ctx.internal_dir())
            .await
            .context("Unable to create the internal directory")?;
        if !ctx.offline {
            self.start_monitors().await;
        }
        if ctx.child.image.is_some() {
            tokio::fs::create_dir_all(ctx.child.scratch_dir())
                .await
                .context("Unable to create the scratch directory")?;
        }

        let spec = ctx.child.launch_spec(&ctx.console_file())?;
        let handle = child.insert(self.launcher.spawn(&spec).await?);
        let started = Instant::now();
        loop {
            match self.markers.get(CANCEL_MARKER_KEY).await {
                Ok(Some(reason)) => return Err(ComputeException::JobCanceled { reason }),
                Ok(None) => {}
                Err(e) => warn!("Unable to read the cancel marker: {e:#}"),
            }
            if let Some(timeout) = ctx.timeout {
                if started.elapsed() > timeout {
                    return Err(ComputeException::JobTimedOut {
                        seconds: timeout.as_secs(),
                    });
                }
            }
            match handle.try_exit_code().await? {
                Some(0) => return Ok(()),
                Some(code) => return Err(ComputeException::ProcessExit { code }),
                None => sleep(self.poll_interval).await,
            }
        }
    }

    async fn start_monitors(&self) {
        let Some(base) = &self.monitor_command else {
            return;
        };
        let parent_pid = std::process::id().to_string();
        for kind in MONITOR_KINDS {
            let spec = base
                .clone()
                .args(["monitor", kind, "--parent-pid", parent_pid.as_str()]);
            if let Err(e) = self.launcher.spawn_detached(&spec).await {
                warn!("Unable to start the {kind} monitor: {e:#}");
            }
        }
    }
}

async fn stop(child: &dyn ProcessHandle) {
    if child.is_alive().await {
        if let Err(e) = child.terminate().await {
            warn!("Unable to terminate the app process: {e:#}");
        }
    }
}

/// Remove everything in `dir` except the internal directory. Entries that
/// vanish meanwhile are ignored.
async fn clean_job_dir(dir: &Path) -> anyhow::Result<()> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name() == INTERNAL_DIR_NAME {
            continue;
        }
        let path = entry.path();
        let removed = match entry.file_type().await {
            Ok(kind) if kind.is_dir() => tokio::fs::remove_dir_all(&path).await,
            _ => tokio::fs::remove_file(&path).await,
        };
        match removed {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Unable to remove {}", path.display()))
            }
        }
    }
    Ok(())
}
