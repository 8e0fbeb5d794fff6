use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use domain_compute::{
    model::entity::JobCredentials,
    service::{CoordinationService, ProcessHandle},
};
use tokio::time::sleep;
use tracing::{debug, warn};
use typed_builder::TypedBuilder;

use super::{upload_output, Cadence, Ticker};

pub const CONSOLE_OUTPUT_NAME: &str = "_console_output";

/// Ships the job's captured console output.
#[derive(TypedBuilder)]
pub struct ConsoleOutputMonitor {
    coordination: Arc<dyn CoordinationService>,
    job: JobCredentials,
    #[builder(setter(into))]
    console_file: PathBuf,
    #[builder(default)]
    cadence: Cadence,
    #[builder(default = Duration::from_secs(1))]
    poll_interval: Duration,
}

impl ConsoleOutputMonitor {
    /// Upload on the cadence while `parent` lives, then once more.
    pub async fn run(&self, parent: &dyn ProcessHandle) {
        let mut ticker = Ticker::new(self.cadence.clone());
        let mut last_uploaded: Option<String> = None;
        while parent.is_alive().await {
            sleep(self.poll_interval).await;
            if !ticker.due() {
                continue;
            }
            let text = self.read().await;
            if last_uploaded.as_ref() == Some(&text) {
                continue;
            }
            match self.send(text.clone()).await {
                Ok(()) => last_uploaded = Some(text),
                Err(e) => warn!("Unable to upload console output of job {}: {e:#}", self.job.job_id),
            }
        }
        if let Err(e) = self.upload().await {
            warn!("Final console upload of job {} failed: {e:#}", self.job.job_id);
        }
    }

    pub async fn upload(&self) -> anyhow::Result<()> {
        let text = self.read().await;
        self.send(text).await
    }

    async fn read(&self) -> String {
        match tokio::fs::read(&self.console_file).await {
            Ok(bytes) => coalesce_carriage_returns(&String::from_utf8_lossy(&bytes)),
            Err(e) => {
                debug!("Console file {} unreadable: {e}", self.console_file.display());
                String::new()
            }
        }
    }

    async fn send(&self, text: String) -> anyhow::Result<()> {
        upload_output(
            self.coordination.as_ref(),
            &self.job,
            CONSOLE_OUTPUT_NAME,
            text.into_bytes(),
        )
        .await
    }
}

/// Keep only the text after the last carriage return of every line, the way a
/// terminal shows progress bars. `\r\n` line endings are kept as line ends.
pub fn coalesce_carriage_returns(text: &str) -> String {
    text.split('\n')
        .map(|line| {
            let line = line.strip_suffix('\r').unwrap_or(line);
            match line.rfind('\r') {
                Some(i) => &line[i + 1..],
                None => line,
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use domain_compute::mock::prelude::*;

    use super::*;

    #[test]
    fn test_coalesce() {
        assert_eq!(
            coalesce_carriage_returns("start\n10%\r50%\r100%\ndone\n"),
            "start\n100%\ndone\n"
        );
        assert_eq!(coalesce_carriage_returns("a\r\nb\r\n"), "a\nb\n");
        assert_eq!(coalesce_carriage_returns("x\r"), "x");
        assert_eq!(coalesce_carriage_returns(""), "");
    }

    fn parent_alive_for(polls: usize) -> MockProcessHandle {
        let remaining = AtomicUsize::new(polls);
        let mut parent = MockProcessHandle::new();
        parent.expect_is_alive().returning(move || {
            remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        });
        parent
    }

    #[tokio::test(start_paused = true)]
    async fn test_uploads_changes_and_final_output() {
        let dir = tempfile::tempdir().unwrap();
        let console_file = dir.path().join("console_output.txt");
        tokio::fs::write(&console_file, "10%\r100%\n").await.unwrap();

        let uploads = Arc::new(Mutex::new(Vec::new()));
        let mut coordination = MockCoordinationService::new();
        coordination
            .expect_get_upload_url()
            .withf(|_, name| name == CONSOLE_OUTPUT_NAME)
            .returning(|_, _| Ok("https://upload".to_string()));
        {
            let uploads = uploads.clone();
            coordination.expect_upload_to_url().returning(move |_, content| {
                uploads.lock().unwrap().push(String::from_utf8(content).unwrap());
                Ok(())
            });
        }
        let monitor = ConsoleOutputMonitor::builder()
            .coordination(Arc::new(coordination))
            .job(JobCredentials {
                job_id: "j".into(),
                job_private_key: "k".into(),
            })
            .console_file(console_file)
            .cadence(Cadence::fixed(Duration::from_secs(10)))
            .build();

        monitor.run(&parent_alive_for(25)).await;
        // The unchanged upload at 20s is skipped; the final one always happens.
        assert_eq!(*uploads.lock().unwrap(), vec!["100%\n", "100%\n"]);
    }
}
