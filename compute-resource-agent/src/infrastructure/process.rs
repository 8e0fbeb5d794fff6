use std::fs::OpenOptions;
use std::process::Stdio;

use anyhow::Context;
use async_trait::async_trait;
use domain_compute::{
    model::vo::LaunchSpec,
    service::{ProcessHandle, ProcessLauncher},
};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::debug;

/// Starts local processes with tokio.
#[derive(Default)]
pub struct TokioProcessLauncher;

impl TokioProcessLauncher {
    fn command(spec: &LaunchSpec) -> anyhow::Result<Command> {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args).envs(&spec.env).stdin(Stdio::null());
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }
        match &spec.output {
            Some(output) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(output)
                    .with_context(|| format!("Unable to open {}", output.display()))?;
                command.stdout(file.try_clone()?).stderr(file);
            }
            None => {
                command.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }
        Ok(command)
    }
}

#[async_trait]
impl ProcessLauncher for TokioProcessLauncher {
    async fn spawn(&self, spec: &LaunchSpec) -> anyhow::Result<Box<dyn ProcessHandle>> {
        let child = Self::command(spec)?
            .spawn()
            .with_context(|| format!("Unable to start {}", spec.program))?;
        Ok(Box::new(SpawnedProcess {
            pid: child.id(),
            child: Mutex::new(child),
        }))
    }

    async fn spawn_detached(&self, spec: &LaunchSpec) -> anyhow::Result<Option<u32>> {
        let mut command = Self::command(spec)?;
        // Own process group, so signals to the caller do not reach it.
        command.process_group(0);
        let mut child = command
            .spawn()
            .with_context(|| format!("Unable to start {}", spec.program))?;
        let pid = child.id();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!("Detached process {pid:?} exited with {status}"),
                Err(e) => debug!("Unable to reap detached process {pid:?}: {e}"),
            }
        });
        Ok(pid)
    }
}

/// A child of this process.
pub struct SpawnedProcess {
    pid: Option<u32>,
    child: Mutex<Child>,
}

#[async_trait]
impl ProcessHandle for SpawnedProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn is_alive(&self) -> bool {
        matches!(self.child.lock().await.try_wait(), Ok(None))
    }

    async fn try_exit_code(&self) -> anyhow::Result<Option<i32>> {
        let status = self.child.lock().await.try_wait()?;
        Ok(status.map(|status| exit_code(&status)))
    }

    async fn terminate(&self) -> anyhow::Result<()> {
        self.child.lock().await.kill().await?;
        Ok(())
    }
}

/// Killed processes report `128 + signal` like shells do.
fn exit_code(status: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

/// A process found by pid, typically the parent of a monitor.
pub struct PidHandle {
    pid: u32,
    proc_root: std::path::PathBuf,
}

impl PidHandle {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            proc_root: "/proc".into(),
        }
    }
}

#[async_trait]
impl ProcessHandle for PidHandle {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn is_alive(&self) -> bool {
        let stat = self.proc_root.join(self.pid.to_string()).join("stat");
        match tokio::fs::read_to_string(stat).await {
            Ok(stat) => process_state(&stat).is_some_and(|state| state != 'Z' && state != 'X'),
            Err(_) => false,
        }
    }

    async fn try_exit_code(&self) -> anyhow::Result<Option<i32>> {
        if self.is_alive().await {
            return Ok(None);
        }
        anyhow::bail!("Process {} is not a child, its exit code is unknown", self.pid)
    }

    async fn terminate(&self) -> anyhow::Result<()> {
        let out = Command::new("kill")
            .arg(self.pid.to_string())
            .output()
            .await?;
        if !out.status.success() {
            anyhow::bail!("Exit Status not 0 for kill {}. real: {}", self.pid, out.status)
        }
        Ok(())
    }
}

/// State letter of a `/proc/<pid>/stat` line. The command name may contain
/// spaces and parentheses, so parse from the last `)`.
fn process_state(stat: &str) -> Option<char> {
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().next()?.chars().next()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_process_state() {
        assert_eq!(process_state("42 (bash) S 1 42 42 0 -1"), Some('S'));
        assert_eq!(process_state("42 (my (odd) name) Z 1 42"), Some('Z'));
        assert_eq!(process_state("garbage"), None);
    }

    #[tokio::test]
    async fn test_spawn_captures_output_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.txt");
        let spec = LaunchSpec::new("sh")
            .args(["-c", "echo hello $GREETING_TARGET; exit 3"])
            .env("GREETING_TARGET", "world")
            .working_dir(dir.path())
            .output(&output);
        let handle = TokioProcessLauncher.spawn(&spec).await.unwrap();
        let code = loop {
            if let Some(code) = handle.try_exit_code().await.unwrap() {
                break code;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        };
        assert_eq!(code, 3);
        assert!(!handle.is_alive().await);
        assert_eq!(std::fs::read_to_string(output).unwrap(), "hello world\n");
    }

    #[tokio::test]
    async fn test_terminate() {
        let handle = TokioProcessLauncher
            .spawn(&LaunchSpec::new("sleep").arg("30"))
            .await
            .unwrap();
        assert!(handle.is_alive().await);
        handle.terminate().await.unwrap();
        assert_eq!(handle.try_exit_code().await.unwrap(), Some(128 + 9));
    }

    #[tokio::test]
    async fn test_pid_handle_sees_own_process() {
        assert!(PidHandle::new(std::process::id()).is_alive().await);
        assert!(!PidHandle::new(u32::MAX).is_alive().await);
    }
}
