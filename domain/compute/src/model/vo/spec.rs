use serde::{Deserialize, Serialize};

use super::RunMethod;

/// An app assigned to this compute resource, as listed by the coordination service.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppDescriptor {
    pub name: String,
    /// Local path, http(s) URL or source-forge blob URL of the app spec.
    pub spec_uri: String,
}

/// Loaded app specification.
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Container image the app runs in; absent or empty runs it on the host.
    pub app_image: Option<String>,
    /// Executable run inside the job's working directory (or container).
    #[serde(default)]
    pub app_executable: String,
    #[serde(default)]
    pub processors: Vec<ProcessorSpec>,
}

/// A named computation declared by an app. Inputs, outputs and parameters are
/// validated elsewhere and carried opaquely.
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub inputs: serde_json::Value,
    #[serde(default)]
    pub outputs: serde_json::Value,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// Aggregate capability spec published upstream.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComputeResourceSpec {
    pub apps: Vec<AppSpec>,
    pub default_run_method: Option<RunMethod>,
    pub available_run_methods: Vec<RunMethod>,
}
