use thiserror::Error;

pub type ComputeResult<T> = Result<T, ComputeException>;

/// Failures that end a job. Every message here is what the user sees in the
/// job's `error` field.
#[derive(Error, Debug)]
pub enum ComputeException {
    #[error("runMethod is None")]
    RunMethodNone,

    #[error("requiredResources is None")]
    RequiredResourcesNone,

    #[error("could not find app for processor: {processor}")]
    AppNotFound { processor: String },

    #[error("numGpus > 1 is not supported")]
    MultiGpuUnsupported,

    #[error("time limit must be positive, got {time_limit_sec} seconds")]
    InvalidTimeLimit { time_limit_sec: f64 },

    #[error("container image set ({image}) but no container method is configured")]
    NoContainerRuntime { image: String },

    #[error("container image mismatch for job definition {job_definition}: expected {expected}, found {actual}")]
    ImageMismatch {
        job_definition: String,
        expected: String,
        actual: String,
    },

    #[error("job definition {job_definition} is not registered")]
    JobDefinitionMissing { job_definition: String },

    #[error("job canceled: {reason}")]
    JobCanceled { reason: String },

    #[error("job timed out after {seconds} seconds")]
    JobTimedOut { seconds: u64 },

    #[error("app process exited with code {code}")]
    ProcessExit { code: i32 },

    #[error("required environment variable {name} is not set")]
    MissingEnvironment { name: String },

    #[error("internal error: {source}")]
    InternalError {
        #[source]
        source: anyhow::Error,
    },
}

impl From<anyhow::Error> for ComputeException {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<ComputeException>() {
            Ok(e) => e,
            Err(e) => ComputeException::InternalError { source: e },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_visible_messages() {
        assert_eq!(ComputeException::RunMethodNone.to_string(), "runMethod is None");
        assert_eq!(
            ComputeException::MultiGpuUnsupported.to_string(),
            "numGpus > 1 is not supported"
        );
        assert_eq!(
            ComputeException::AppNotFound {
                processor: "p1".into()
            }
            .to_string(),
            "could not find app for processor: p1"
        );
    }

    #[test]
    fn test_anyhow_round_trip_keeps_variant() {
        let e: anyhow::Error = ComputeException::MultiGpuUnsupported.into();
        let e: ComputeException = e.into();
        assert!(matches!(e, ComputeException::MultiGpuUnsupported));
    }
}
