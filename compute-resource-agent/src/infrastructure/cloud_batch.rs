use anyhow::Context;
use async_trait::async_trait;
use domain_compute::{
    model::vo::{env, RequiredResources},
    service::{CloudBatchService, CloudBatchSubmission},
};
use serde::Deserialize;
use serde_json::json;
use tokio::process::Command;
use tracing::info;

/// AWS Batch driven through the `aws` CLI.
pub struct AwsBatchClient {
    program: String,
    job_queue: String,
    region: Option<String>,
    execution_role_arn: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeJobDefinitions {
    #[serde(default)]
    job_definitions: Vec<JobDefinition>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobDefinition {
    revision: u64,
    #[serde(default)]
    container_properties: Option<ContainerProperties>,
}

#[derive(Deserialize)]
struct ContainerProperties {
    image: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitJobOutput {
    job_id: String,
}

impl AwsBatchClient {
    pub fn new(
        job_queue: impl Into<String>,
        region: Option<String>,
        execution_role_arn: Option<String>,
    ) -> Self {
        Self {
            program: "aws".to_string(),
            job_queue: job_queue.into(),
            region,
            execution_role_arn,
        }
    }

    async fn batch(&self, args: Vec<String>) -> anyhow::Result<serde_json::Value> {
        let mut command = Command::new(&self.program);
        command.arg("batch").args(&args).args(["--output", "json"]);
        if let Some(region) = &self.region {
            command.args(["--region", region.as_str()]);
        }
        let out = command
            .output()
            .await
            .with_context(|| format!("Unable to run {}", self.program))?;
        if !out.status.success() {
            anyhow::bail!(
                "Exit Status not 0 for aws batch {}. real: {}, stderr: {}",
                args.first().map(String::as_str).unwrap_or_default(),
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            )
        }
        Ok(serde_json::from_slice(&out.stdout)?)
    }

    fn container_properties(&self, image: &str) -> serde_json::Value {
        let mut properties = json!({
            "image": image,
            // The executable is resolved per job and passed in the environment.
            "command": ["/bin/sh", "-c", format!("exec \"${}\"", env::APP_EXECUTABLE)],
            "resourceRequirements": [
                {"type": "VCPU", "value": "1"},
                {"type": "MEMORY", "value": "2048"},
            ],
        });
        if let Some(role) = &self.execution_role_arn {
            properties["executionRoleArn"] = json!(role);
            properties["jobRoleArn"] = json!(role);
        }
        properties
    }
}

/// Per-job overrides: environment plus the declared resources.
fn container_overrides(submission: &CloudBatchSubmission) -> serde_json::Value {
    let environment: Vec<_> = submission
        .env
        .iter()
        .map(|(name, value)| json!({"name": name, "value": value}))
        .collect();
    json!({
        "environment": environment,
        "resourceRequirements": resource_requirements(&submission.resources),
    })
}

fn resource_requirements(resources: &RequiredResources) -> Vec<serde_json::Value> {
    let memory_mib = (resources.memory_gb * 1024.0).floor().max(1.0) as u64;
    let mut requirements = vec![
        json!({"type": "VCPU", "value": resources.cpu_count.max(1).to_string()}),
        json!({"type": "MEMORY", "value": memory_mib.to_string()}),
    ];
    if resources.gpu_count > 0 {
        requirements.push(json!({"type": "GPU", "value": resources.gpu_count.to_string()}));
    }
    requirements
}

/// Image of the newest active revision.
fn latest_image(output: serde_json::Value) -> anyhow::Result<Option<String>> {
    let described: DescribeJobDefinitions = serde_json::from_value(output)?;
    Ok(described
        .job_definitions
        .into_iter()
        .max_by_key(|definition| definition.revision)
        .and_then(|definition| definition.container_properties)
        .and_then(|properties| properties.image))
}

#[async_trait]
impl CloudBatchService for AwsBatchClient {
    fn job_definition_name(&self, app_name: &str) -> String {
        let sanitized: String = app_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let mut name = format!("dendro-{sanitized}");
        name.truncate(128);
        name
    }

    async fn job_definition_image(&self, job_definition: &str) -> anyhow::Result<Option<String>> {
        let output = self
            .batch(vec![
                "describe-job-definitions".into(),
                "--job-definition-name".into(),
                job_definition.into(),
                "--status".into(),
                "ACTIVE".into(),
            ])
            .await?;
        latest_image(output)
    }

    async fn ensure_job_definition(&self, app_name: &str, image: &str) -> anyhow::Result<()> {
        let name = self.job_definition_name(app_name);
        if self.job_definition_image(&name).await?.as_deref() == Some(image) {
            return Ok(());
        }
        self.batch(vec![
            "register-job-definition".into(),
            "--job-definition-name".into(),
            name.clone(),
            "--type".into(),
            "container".into(),
            "--container-properties".into(),
            self.container_properties(image).to_string(),
        ])
        .await?;
        info!("Registered job definition {name} for image {image}");
        Ok(())
    }

    async fn submit_job(&self, submission: &CloudBatchSubmission) -> anyhow::Result<String> {
        let output = self
            .batch(vec![
                "submit-job".into(),
                "--job-name".into(),
                submission.job_name.clone(),
                "--job-queue".into(),
                self.job_queue.clone(),
                "--job-definition".into(),
                submission.job_definition.clone(),
                "--timeout".into(),
                format!("attemptDurationSeconds={}", submission.timeout.as_secs().max(60)),
                "--container-overrides".into(),
                container_overrides(submission).to_string(),
            ])
            .await?;
        let submitted: SubmitJobOutput = serde_json::from_value(output)?;
        Ok(submitted.job_id)
    }
}
