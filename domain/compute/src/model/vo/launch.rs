use std::collections::BTreeMap;
use std::path::PathBuf;

/// Everything needed to start a process.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
    /// File receiving both stdout and stderr.
    pub output: Option<PathBuf>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn output(mut self, file: impl Into<PathBuf>) -> Self {
        self.output = Some(file.into());
        self
    }

    /// Equivalent single-line shell command.
    pub fn to_shell_command(&self) -> String {
        let mut parts = Vec::new();
        if let Some(dir) = &self.working_dir {
            parts.push(format!("cd {} &&", shell_quote(&dir.to_string_lossy())));
        }
        if !self.env.is_empty() {
            parts.push("env".to_string());
            for (k, v) in self.env.iter() {
                parts.push(format!("{k}={}", shell_quote(v)));
            }
        }
        parts.push(shell_quote(&self.program));
        parts.extend(self.args.iter().map(|a| shell_quote(a)));
        let mut command = parts.join(" ");
        if let Some(output) = &self.output {
            command += &format!(" > {} 2>&1", shell_quote(&output.to_string_lossy()));
        }
        command
    }
}

/// Quote `s` for POSIX shells.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars().all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Caller's choice of what the dispatcher should do with an admitted job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchMode {
    /// Spawn a detached process that outlives the daemon.
    Detach,
    /// Return the shell command without running it.
    ShellCommand,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Spawned { pid: Option<u32> },
    Submitted { batch_job_id: String },
    ShellCommand(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_command() {
        let spec = LaunchSpec::new("/usr/bin/agent")
            .arg("run-job")
            .env("JOB_ID", "abc")
            .env("NOTE", "it's here")
            .working_dir("/data/jobs/abc");
        assert_eq!(
            spec.to_shell_command(),
            r"cd /data/jobs/abc && env JOB_ID=abc NOTE='it'\''s here' /usr/bin/agent run-job"
        );
    }

    #[test]
    fn test_quote_empty() {
        assert_eq!(shell_quote(""), "''");
    }
}
