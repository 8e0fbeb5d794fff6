use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Execution backend a job is bound to at creation time.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RunMethod {
    /// Subprocess on the compute resource host.
    Local,
    /// Cloud batch service.
    #[serde(alias = "aws_batch")]
    Batch,
    /// Slurm-style HPC scheduler.
    #[serde(alias = "slurm")]
    Hpc,
}

impl RunMethod {
    pub const ALL: [RunMethod; 3] = [RunMethod::Local, RunMethod::Batch, RunMethod::Hpc];
}

impl fmt::Display for RunMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunMethod::Local => "local",
            RunMethod::Batch => "batch",
            RunMethod::Hpc => "hpc",
        };
        f.write_str(s)
    }
}

impl FromStr for RunMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "local" => RunMethod::Local,
            "batch" | "aws_batch" => RunMethod::Batch,
            "hpc" | "slurm" => RunMethod::Hpc,
            _ => anyhow::bail!("Unknown run method: {s}"),
        })
    }
}
