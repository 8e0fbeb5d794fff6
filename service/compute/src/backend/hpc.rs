use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain_compute::{
    exception::ComputeException,
    model::{
        entity::Job,
        vo::{DispatchMode, DispatchOutcome, JobStatus, PendingJobGroup, RunMethod},
    },
    repository::KeyValueStore,
    service::{
        BackendManager, Clock, CoordinationService, HpcSubmission, HpcSubmitter,
        JobDispatchService,
    },
};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use typed_builder::TypedBuilder;

use super::{fail_job, format_time_limit, group_pending_jobs, render_group_script};
use crate::AttemptTracker;

#[derive(Clone, Debug, TypedBuilder)]
pub struct HpcSettings {
    #[builder(default = 5)]
    pub max_simultaneous_groups: usize,
    #[builder(default = 100)]
    pub node_cpu_capacity: u32,
    /// Quiet period after the job count last changed before groups are formed.
    #[builder(default = Duration::from_secs(5))]
    pub debounce: Duration,
    #[builder(default, setter(strip_option, into))]
    pub cpu_partition: Option<String>,
    #[builder(default, setter(strip_option, into))]
    pub gpu_partition: Option<String>,
    #[builder(default = Duration::from_secs(300))]
    pub housekeeping_interval: Duration,
    /// Scripts and group markers older than this are deleted.
    #[builder(default = Duration::from_secs(48 * 3600))]
    pub artifact_max_age: Duration,
    #[builder(setter(into))]
    pub scripts_dir: PathBuf,
}

#[derive(Default)]
struct HpcState {
    jobs: Vec<Job>,
    last_count_change: Option<DateTime<Utc>>,
    last_housekeeping: Option<DateTime<Utc>>,
    /// Groups submitted by this process, keyed by group id, whose members
    /// the snapshot still lists as pending.
    submitted: HashMap<String, Vec<String>>,
}

/// Packs pending HPC jobs into shared allocations.
///
/// Group membership of submitted jobs is persisted in `markers` (job id ->
/// group id) so the number of occupied groups survives a daemon restart.
#[derive(TypedBuilder)]
pub struct HpcBackendManager {
    settings: HpcSettings,
    dispatcher: Arc<dyn JobDispatchService>,
    coordination: Arc<dyn CoordinationService>,
    submitter: Arc<dyn HpcSubmitter>,
    markers: Arc<dyn KeyValueStore>,
    tracker: Arc<AttemptTracker>,
    clock: Arc<dyn Clock>,
    #[builder(default, setter(skip))]
    state: Mutex<HpcState>,
}

#[async_trait]
impl BackendManager for HpcBackendManager {
    fn run_method(&self) -> RunMethod {
        RunMethod::Hpc
    }

    async fn handle_jobs(&self, jobs: Vec<Job>) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if jobs.len() != state.jobs.len() {
            state.last_count_change = Some(self.clock.now());
        }
        state.jobs = jobs;
        Ok(())
    }

    async fn do_work(&self) -> anyhow::Result<()> {
        let now = self.clock.now();
        let (jobs, last_count_change, housekeeping_due) = {
            let mut state = self.state.lock().await;
            let housekeeping_due = state
                .last_housekeeping
                .map_or(true, |last| elapsed(last, now) >= self.settings.housekeeping_interval);
            if housekeeping_due {
                state.last_housekeeping = Some(now);
            }
            (state.jobs.clone(), state.last_count_change, housekeeping_due)
        };
        if housekeeping_due {
            self.housekeeping().await;
        }
        if let Some(changed) = last_count_change {
            if elapsed(changed, now) < self.settings.debounce {
                return Ok(());
            }
        }

        let mut pending: Vec<Job> = Vec::new();
        for job in jobs.iter() {
            if job.status != JobStatus::Pending || self.tracker.was_attempted(&job.job_id) {
                continue;
            }
            if job.required_resources.is_none() {
                self.fail(job, ComputeException::RequiredResourcesNone.to_string()).await;
                continue;
            }
            pending.push(job.clone());
        }
        if pending.is_empty() {
            return Ok(());
        }

        let mut occupied = self.occupied_groups(&jobs).await;
        if occupied >= self.settings.max_simultaneous_groups {
            debug!("{occupied} HPC groups in flight, waiting");
            return Ok(());
        }
        pending.sort_by(|a, b| a.cmp_created(b));
        for group in group_pending_jobs(pending, self.settings.node_cpu_capacity) {
            if occupied >= self.settings.max_simultaneous_groups {
                break;
            }
            if self.submit_group(group).await {
                occupied += 1;
            }
        }
        Ok(())
    }
}

impl HpcBackendManager {
    /// Distinct groups of jobs currently starting or running, plus groups
    /// submitted here that the snapshot does not reflect yet.
    async fn occupied_groups(&self, jobs: &[Job]) -> usize {
        let pending: HashSet<&str> = jobs
            .iter()
            .filter(|job| job.status == JobStatus::Pending)
            .map(|job| job.job_id.as_str())
            .collect();
        let mut groups: HashSet<String> = {
            let mut state = self.state.lock().await;
            state
                .submitted
                .retain(|_, members| members.iter().any(|id| pending.contains(id.as_str())));
            state.submitted.keys().cloned().collect()
        };
        for job in jobs.iter().filter(|job| job.status.is_active()) {
            match self.markers.get(&job.job_id).await {
                Ok(Some(group_id)) => {
                    groups.insert(group_id);
                }
                Ok(None) => {}
                Err(e) => warn!("Unable to read group of job {}: {e:#}", job.job_id),
            }
        }
        groups.len()
    }

    /// Returns whether a submission was handed to the scheduler.
    async fn submit_group(&self, group: PendingJobGroup) -> bool {
        for job_id in group.job_ids() {
            self.tracker.mark_started(job_id);
        }
        let resources = group.required_resources;
        if resources.gpu_count > 1 {
            self.fail_all(&group.jobs, ComputeException::MultiGpuUnsupported.to_string())
                .await;
            return false;
        }
        let time_limit = match format_time_limit(resources.time_limit_sec) {
            Ok(time_limit) => time_limit,
            Err(e) => {
                self.fail_all(&group.jobs, e.to_string()).await;
                return false;
            }
        };

        let mut commands = Vec::new();
        let mut members = Vec::new();
        for job in group.jobs.iter() {
            match self.dispatcher.start_job(job, DispatchMode::ShellCommand).await {
                Ok(DispatchOutcome::ShellCommand(command)) => {
                    commands.push(command);
                    members.push(job.clone());
                }
                Ok(outcome) => {
                    self.fail(job, format!("unexpected dispatch outcome: {outcome:?}")).await
                }
                Err(e) => self.fail(job, e.to_string()).await,
            }
        }
        if commands.is_empty() {
            warn!("No runnable job in HPC group {}, nothing submitted", group.group_id);
            return false;
        }

        let mut options = vec![
            format!("--ntasks={}", members.len()),
            format!("--cpus-per-task={}", resources.cpu_count.max(1)),
            format!("--mem-per-cpu={}M", resources.memory_per_cpu_mb()),
            format!("--time={time_limit}"),
        ];
        let partition = if resources.needs_gpu() {
            self.settings.gpu_partition.as_ref()
        } else {
            self.settings.cpu_partition.as_ref()
        };
        if let Some(partition) = partition {
            options.push(format!("--partition={partition}"));
        }
        if resources.needs_gpu() {
            options.push(format!("--gpus-per-task={}", resources.gpu_count));
        }

        match self.write_and_submit(&group.group_id, &commands, &members, options).await {
            Ok(()) => {
                self.state.lock().await.submitted.insert(
                    group.group_id.clone(),
                    members.iter().map(|job| job.job_id.clone()).collect(),
                );
                info!(
                    "Submitted HPC group {} with {} job(s)",
                    group.group_id,
                    members.len()
                );
                true
            }
            Err(e) => {
                error!("Unable to submit HPC group {}: {e:#}", group.group_id);
                self.fail_all(&members, format!("HPC submission failed: {e:#}")).await;
                false
            }
        }
    }

    async fn write_and_submit(
        &self,
        group_id: &str,
        commands: &[String],
        members: &[Job],
        options: Vec<String>,
    ) -> anyhow::Result<()> {
        let script = render_group_script(commands)?;
        tokio::fs::create_dir_all(&self.settings.scripts_dir).await?;
        let script_path = self.settings.scripts_dir.join(format!("slurm_batch_{group_id}.sh"));
        tokio::fs::write(&script_path, script).await?;
        for job in members.iter() {
            self.markers.put(&job.job_id, group_id).await?;
        }
        self.submitter
            .submit(HpcSubmission {
                group_id: group_id.to_string(),
                script_path,
                options,
            })
            .await
    }

    async fn fail(&self, job: &Job, reason: String) {
        fail_job(self.coordination.as_ref(), &self.tracker, job, &reason).await
    }

    async fn fail_all(&self, jobs: &[Job], reason: String) {
        for job in jobs.iter() {
            self.fail(job, reason.clone()).await;
        }
    }

    async fn housekeeping(&self) {
        let max_age = self.settings.artifact_max_age;
        match self.markers.purge_older_than(max_age).await {
            Ok(0) => {}
            Ok(n) => info!("Removed {n} stale HPC group marker(s)"),
            Err(e) => warn!("Unable to purge HPC group markers: {e:#}"),
        }
        match purge_old_files(&self.settings.scripts_dir, max_age).await {
            Ok(0) => {}
            Ok(n) => info!("Removed {n} stale HPC script(s)"),
            Err(e) => warn!("Unable to purge HPC scripts: {e:#}"),
        }
    }
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

/// Delete regular files in `dir` modified longer than `max_age` ago. Entries
/// vanishing during the scan are skipped.
async fn purge_old_files(dir: &Path, max_age: Duration) -> anyhow::Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        let stale = metadata
            .modified()
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .is_some_and(|age| age > max_age);
        if metadata.is_file() && stale {
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(removed)
}
