use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use domain_compute::service::BackgroundService;
use tracing::{debug, info, warn};

/// Deletes job directories nobody touched for `max_age`.
pub struct DiskCleanupService {
    jobs_dir: PathBuf,
    max_age: Duration,
    interval: Duration,
}

impl DiskCleanupService {
    pub fn new(jobs_dir: impl Into<PathBuf>, max_age: Duration, interval: Duration) -> Self {
        Self {
            jobs_dir: jobs_dir.into(),
            max_age,
            interval,
        }
    }

    /// One sweep; returns how many directories were removed. Jobs start and
    /// finish while this runs, so vanished entries are skipped.
    pub async fn cleanup_once(&self) -> anyhow::Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.jobs_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let now = SystemTime::now();
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if !metadata.is_dir() {
                continue;
            }
            let age = now
                .duration_since(metadata.modified()?)
                .unwrap_or_default();
            if age < self.max_age {
                continue;
            }
            match tokio::fs::remove_dir_all(entry.path()).await {
                Ok(()) => {
                    debug!("Removed stale job directory {}", entry.path().display());
                    removed += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Unable to remove {}: {e}", entry.path().display()),
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl BackgroundService for DiskCleanupService {
    async fn run(&self) {
        loop {
            match self.cleanup_once().await {
                Ok(0) => {}
                Ok(removed) => info!("Disk cleanup removed {removed} job directories"),
                Err(e) => warn!("Disk cleanup failed: {e}"),
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}
