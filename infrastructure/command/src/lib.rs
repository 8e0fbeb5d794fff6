//! Messages received on the compute resource's push-notification channel

use serde::{Deserialize, Serialize};

/// Wake-up hint published to the compute resource.
///
/// These only nudge the orchestration loop to refresh early; the unfinished
/// job listing stays the source of truth.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WakeUpMessage {
    /// A job bound to this compute resource was created.
    #[serde(rename_all = "camelCase")]
    NewPendingJob {
        #[serde(default)]
        job_id: Option<String>,
    },
    /// A job of this compute resource changed status.
    #[serde(rename_all = "camelCase")]
    JobStatusChanged {
        #[serde(default)]
        job_id: Option<String>,
        #[serde(default)]
        status: Option<String>,
    },
    /// The set of apps assigned to this compute resource changed.
    AppsChanged,
}

impl WakeUpMessage {
    /// Whether the unfinished job listing should be fetched again.
    pub fn requests_job_refresh(&self) -> bool {
        matches!(
            self,
            WakeUpMessage::NewPendingJob { .. } | WakeUpMessage::JobStatusChanged { .. }
        )
    }

    pub fn requests_app_refresh(&self) -> bool {
        matches!(self, WakeUpMessage::AppsChanged)
    }
}

/// Pub/sub channel name for a compute resource.
pub fn channel_name(compute_resource_id: &str) -> String {
    format!("compute-resource:{compute_resource_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_messages() {
        let msg: WakeUpMessage =
            serde_json::from_str(r#"{"type": "newPendingJob", "jobId": "abc"}"#).unwrap();
        assert_eq!(
            msg,
            WakeUpMessage::NewPendingJob {
                job_id: Some("abc".into())
            }
        );
        assert!(msg.requests_job_refresh());

        let msg: WakeUpMessage = serde_json::from_str(r#"{"type": "appsChanged"}"#).unwrap();
        assert!(msg.requests_app_refresh());
        assert!(!msg.requests_job_refresh());
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(serde_json::from_str::<WakeUpMessage>(r#"{"type": "other"}"#).is_err());
    }
}
