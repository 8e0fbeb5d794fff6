use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use domain_compute::{
    model::vo::launch::shell_quote,
    service::{HpcSubmission, HpcSubmitter},
};
use tokio::process::Command;
use tracing::{error, info, Instrument};

/// Hands rendered group scripts to `sbatch`.
pub struct SlurmClient {
    program: String,
}

impl Default for SlurmClient {
    fn default() -> Self {
        Self {
            program: "sbatch".to_string(),
        }
    }
}

impl SlurmClient {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// `<options> --wrap=srun bash <script>`; every task of the allocation
    /// runs the script and picks its own line by `$SLURM_PROCID`.
    pub fn sbatch_args(submission: &HpcSubmission, script: &Path) -> Vec<String> {
        let mut args = submission.options.clone();
        args.push(format!(
            "--wrap=srun bash {}",
            shell_quote(&script.to_string_lossy())
        ));
        args
    }
}

#[async_trait]
impl HpcSubmitter for SlurmClient {
    async fn submit(&self, submission: HpcSubmission) -> anyhow::Result<()> {
        let script = if submission.script_path.is_absolute() {
            submission.script_path.clone()
        } else {
            std::env::current_dir()?.join(&submission.script_path)
        };
        let work_dir = script
            .parent()
            .context("Script path has no parent directory")?;
        let mut command = Command::new(&self.program);
        command
            .args(Self::sbatch_args(&submission, &script))
            .current_dir(work_dir);
        let group_id = submission.group_id;
        tokio::spawn(
            async move {
                match command.output().await {
                    Ok(out) if out.status.success() => {
                        info!(
                            "Group {group_id}: {}",
                            String::from_utf8_lossy(&out.stdout).trim()
                        );
                    }
                    Ok(out) => error!(
                        "Exit Status not 0 for sbatch of group {group_id}. real: {}, stderr: {}",
                        out.status,
                        String::from_utf8_lossy(&out.stderr).trim()
                    ),
                    Err(e) => error!("Unable to run sbatch for group {group_id}: {e}"),
                }
            }
            .instrument(tracing::trace_span!("sbatch")),
        );
        Ok(())
    }
}
