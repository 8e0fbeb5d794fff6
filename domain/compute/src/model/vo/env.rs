//! Environment variables forming the calling convention between the daemon,
//! the job wrapper and the app process.

pub const JOB_ID: &str = "JOB_ID";
pub const JOB_PRIVATE_KEY: &str = "JOB_PRIVATE_KEY";
pub const APP_EXECUTABLE: &str = "APP_EXECUTABLE";
pub const APP_IMAGE: &str = "APP_IMAGE";
pub const CONTAINER_METHOD: &str = "CONTAINER_METHOD";
/// Directory wiped by the wrapper when the job ends.
pub const JOB_CLEANUP_DIR: &str = "JOB_CLEANUP_DIR";
pub const JOB_WORKING_DIR: &str = "JOB_WORKING_DIR";
pub const JOB_TIMEOUT_SEC: &str = "JOB_TIMEOUT_SEC";
pub const JOB_OFFLINE: &str = "JOB_OFFLINE";
pub const COORDINATION_API_URL: &str = "COORDINATION_API_URL";
pub const COMPUTE_RESOURCE_ID: &str = "COMPUTE_RESOURCE_ID";
pub const COMPUTE_RESOURCE_PRIVATE_KEY: &str = "COMPUTE_RESOURCE_PRIVATE_KEY";
