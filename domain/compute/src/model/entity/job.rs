use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::model::vo::{JobStatus, RequiredResources, RunMethod};

/// A unit of work assigned to this compute resource.
#[derive(Clone, Serialize, Deserialize, Debug, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    #[builder(setter(into))]
    pub job_id: String,
    /// Bearer credential for every job-scoped call. Never logged.
    #[builder(default, setter(into))]
    #[serde(default)]
    pub job_private_key: String,
    #[builder(default)]
    #[serde(default)]
    pub status: JobStatus,
    #[builder(default)]
    #[serde(default)]
    pub run_method: Option<RunMethod>,
    #[builder(default)]
    #[serde(default)]
    pub required_resources: Option<RequiredResources>,
    /// Jobs sharing a batch id may be packed into one HPC allocation.
    #[builder(default, setter(strip_option, into))]
    #[serde(default)]
    pub batch_id: Option<String>,
    #[builder(setter(into))]
    pub processor_name: String,
    /// Creation time in seconds since the epoch.
    #[builder(default)]
    #[serde(default)]
    pub timestamp_created: f64,
    #[builder(default)]
    #[serde(default)]
    pub error: Option<String>,
}

impl Job {
    pub fn credentials(&self) -> JobCredentials {
        JobCredentials {
            job_id: self.job_id.clone(),
            job_private_key: self.job_private_key.clone(),
        }
    }

    /// Oldest first.
    pub fn cmp_created(&self, other: &Job) -> Ordering {
        self.timestamp_created
            .total_cmp(&other.timestamp_created)
            .then_with(|| self.job_id.cmp(&other.job_id))
    }
}

/// Identity used to authenticate job-scoped requests.
#[derive(Clone, PartialEq, Eq)]
pub struct JobCredentials {
    pub job_id: String,
    pub job_private_key: String,
}

impl std::fmt::Debug for JobCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobCredentials")
            .field("job_id", &self.job_id)
            .field("job_private_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_from_listing() {
        let job: Job = serde_json::from_str(
            r#"{
                "jobId": "j1",
                "jobPrivateKey": "secret",
                "status": "pending",
                "runMethod": "hpc",
                "requiredResources": {"cpuCount": 2, "gpuCount": 0, "memoryGb": 4, "timeLimitSec": 100},
                "batchId": "b1",
                "processorName": "proc",
                "timestampCreated": 12.5
            }"#,
        )
        .unwrap();
        assert_eq!(job.run_method, Some(RunMethod::Hpc));
        assert_eq!(job.batch_id.as_deref(), Some("b1"));
        assert_eq!(job.required_resources.unwrap().cpu_count, 2);
    }

    #[test]
    fn test_missing_run_method_is_none() {
        let job: Job =
            serde_json::from_str(r#"{"jobId": "j1", "processorName": "p", "runMethod": null}"#)
                .unwrap();
        assert!(job.run_method.is_none());
        assert!(job.required_resources.is_none());
    }

    #[test]
    fn test_credentials_debug_hides_key() {
        let job = Job::builder().job_id("j").job_private_key("k3y").processor_name("p").build();
        assert!(!format!("{:?}", job.credentials()).contains("k3y"));
    }
}
