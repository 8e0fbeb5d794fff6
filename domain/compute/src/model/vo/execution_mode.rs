use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::RunMethod;
use crate::exception::{ComputeException, ComputeResult};
use crate::model::entity::App;

/// Container runtime used for apps that declare an image.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContainerRuntime {
    Docker,
    #[serde(alias = "apptainer")]
    Singularity,
}

impl ContainerRuntime {
    pub fn program(&self) -> &'static str {
        match self {
            ContainerRuntime::Docker => "docker",
            ContainerRuntime::Singularity => "singularity",
        }
    }
}

impl fmt::Display for ContainerRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

impl FromStr for ContainerRuntime {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "docker" => ContainerRuntime::Docker,
            "singularity" | "apptainer" => ContainerRuntime::Singularity,
            _ => anyhow::bail!("Unknown container method: {s}"),
        })
    }
}

/// How an app is executed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Bare executable on the host.
    Local { executable: String },
    /// Executable inside a container started by a local runtime.
    Container {
        image: String,
        executable: String,
        runtime: ContainerRuntime,
    },
    /// Submitted to the cloud batch service.
    CloudBatch { image: String, executable: String },
}

impl ExecutionMode {
    /// Resolve the execution mode of `app` for a job bound to `run_method`.
    ///
    /// Cloud batch is chosen only for batch-bound jobs whose app declares an
    /// image while the batch backend is enabled.
    pub fn resolve(
        app: &App,
        run_method: RunMethod,
        batch_enabled: bool,
        runtime: Option<ContainerRuntime>,
    ) -> ComputeResult<Self> {
        let executable = app.spec.app_executable.clone();
        match app.image() {
            Some(image) if run_method == RunMethod::Batch && batch_enabled => {
                Ok(ExecutionMode::CloudBatch {
                    image: image.to_string(),
                    executable,
                })
            }
            Some(image) => match runtime {
                Some(runtime) => Ok(ExecutionMode::Container {
                    image: image.to_string(),
                    executable,
                    runtime,
                }),
                None => Err(ComputeException::NoContainerRuntime {
                    image: image.to_string(),
                }),
            },
            None => Ok(ExecutionMode::Local { executable }),
        }
    }

    pub fn executable(&self) -> &str {
        match self {
            ExecutionMode::Local { executable }
            | ExecutionMode::Container { executable, .. }
            | ExecutionMode::CloudBatch { executable, .. } => executable,
        }
    }
}
