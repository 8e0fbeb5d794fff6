use dashmap::DashSet;

/// Job ids this daemon already tried to start or fail.
///
/// Lives for one process lifetime; after a restart the coordination service's
/// status field is what prevents a second start.
#[derive(Default, Debug)]
pub struct AttemptTracker {
    started: DashSet<String>,
    failed: DashSet<String>,
}

impl AttemptTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn was_attempted(&self, job_id: &str) -> bool {
        self.started.contains(job_id) || self.failed.contains(job_id)
    }

    /// Returns `false` when the job was already attempted.
    pub fn mark_started(&self, job_id: &str) -> bool {
        if self.failed.contains(job_id) {
            return false;
        }
        self.started.insert(job_id.to_string())
    }

    /// Returns `false` when the job was already failed.
    pub fn mark_failed(&self, job_id: &str) -> bool {
        self.failed.insert(job_id.to_string())
    }
}
