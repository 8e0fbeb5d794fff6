//! Request and response bodies of the coordination service.

use domain_compute::model::{
    entity::Job,
    vo::{AppDescriptor, ComputeResourceSpec, JobStatus},
};
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Debug)]
pub struct UnfinishedJobsResponse {
    pub jobs: Vec<Job>,
}

#[derive(Deserialize, Debug)]
pub struct AppsResponse {
    pub apps: Vec<AppDescriptor>,
}

#[derive(Serialize, Debug)]
pub struct SetSpecRequest<'a> {
    pub spec: &'a ComputeResourceSpec,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SetJobStatusRequest {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub force_update: bool,
}

#[derive(Deserialize, Debug)]
pub struct JobStatusResponse {
    pub status: JobStatus,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlResponse {
    pub upload_url: String,
}

#[derive(Deserialize, Debug)]
pub struct JobResponse {
    pub job: Job,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_request_omits_defaults() {
        let body = SetJobStatusRequest {
            status: JobStatus::Starting,
            error: None,
            force_update: false,
        };
        assert_eq!(serde_json::to_string(&body).unwrap(), r#"{"status":"starting"}"#);

        let body = SetJobStatusRequest {
            status: JobStatus::Failed,
            error: Some("boom".into()),
            force_update: true,
        };
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"status":"failed","error":"boom","forceUpdate":true}"#
        );
    }

    #[test]
    fn test_upload_url_response() {
        let body: UploadUrlResponse =
            serde_json::from_str(r#"{"uploadUrl": "https://bucket/x?sig=1"}"#).unwrap();
        assert_eq!(body.upload_url, "https://bucket/x?sig=1");
    }
}
