mod capacity;
mod hpc;
mod packing;
mod slurm_script;

use domain_compute::{
    model::{entity::Job, vo::JobStatus},
    service::CoordinationService,
};
use tracing::{error, warn};

use crate::AttemptTracker;

#[rustfmt::skip]
pub use {
    capacity::CapacityBackendManager,
    hpc::{HpcBackendManager, HpcSettings},
    packing::group_pending_jobs,
    slurm_script::{format_time_limit, render_group_script},
};

/// Fail `job` once per process lifetime. Reporting errors are logged only.
pub(crate) async fn fail_job(
    coordination: &dyn CoordinationService,
    tracker: &AttemptTracker,
    job: &Job,
    reason: &str,
) {
    if !tracker.mark_failed(&job.job_id) {
        return;
    }
    warn!("Failing job {}: {reason}", job.job_id);
    if let Err(e) = coordination
        .set_job_status(
            &job.credentials(),
            JobStatus::Failed,
            Some(reason.to_string()),
            false,
        )
        .await
    {
        error!("Unable to report failure of job {}: {e:#}", job.job_id);
    }
}
