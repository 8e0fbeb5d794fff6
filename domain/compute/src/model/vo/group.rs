use super::RequiredResources;
use crate::model::entity::Job;

/// Jobs submitted together as one HPC allocation. Recomputed every tick and
/// never persisted.
#[derive(Clone, Debug)]
pub struct PendingJobGroup {
    pub group_id: String,
    pub jobs: Vec<Job>,
    /// Shared by every member, taken from the first one.
    pub required_resources: RequiredResources,
}

impl PendingJobGroup {
    pub fn job_ids(&self) -> impl Iterator<Item = &str> {
        self.jobs.iter().map(|job| job.job_id.as_str())
    }
}
