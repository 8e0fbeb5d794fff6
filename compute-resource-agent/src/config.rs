use std::path::{Path, PathBuf};
use std::time::Duration;

use domain_compute::model::vo::{env, ContainerRuntime, RunMethod};
use serde::*;
use service_compute::{HpcSettings, LoopTiming};

use crate::telemetry::TelemetryConfig;

/// Layered configuration: `config.yaml` in the working directory, then each
/// file in `paths`, then `COMPUTE_RESOURCE__*` environment variables
/// (`COMPUTE_RESOURCE__HPC__NODE_CPU_CAPACITY=64`).
pub fn build_config(paths: &[PathBuf]) -> anyhow::Result<::config::Config> {
    let mut config = ::config::Config::builder().add_source(
        ::config::File::with_name("config")
            .required(false)
            .format(::config::FileFormat::Yaml),
    );
    for path in paths {
        config = config.add_source(
            ::config::File::from(path.as_path())
                .format(::config::FileFormat::Yaml)
                .required(true),
        );
    }
    config = config.add_source(
        ::config::Environment::with_prefix("COMPUTE_RESOURCE")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("enabled_run_methods"),
    );
    Ok(config.build()?)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Base url of the coordination service.
    #[serde(default = "AgentConfig::default_api_url")]
    pub api_url: String,
    /// Push channel; without it the loop relies on periodic refreshes only.
    #[serde(default = "Default::default")]
    pub redis_url: Option<String>,
    #[serde(default = "AgentConfig::default_jobs_dir")]
    pub jobs_dir: PathBuf,
    #[serde(default = "Default::default")]
    pub container_method: Option<ContainerRuntime>,
    #[serde(default = "AgentConfig::default_enabled_run_methods")]
    pub enabled_run_methods: Vec<RunMethod>,
    #[serde(default = "Default::default")]
    pub default_run_method: Option<RunMethod>,
    #[serde(default = "Default::default")]
    pub local: LocalConfig,
    #[serde(default = "Default::default")]
    pub batch: BatchConfig,
    #[serde(default = "Default::default")]
    pub hpc: HpcConfig,
    #[serde(default = "Default::default")]
    pub loop_timing: LoopTimingConfig,
    #[serde(default = "Default::default")]
    pub cleanup: CleanupConfig,
    #[serde(default = "Default::default")]
    pub telemetry: TelemetryConfig,
    #[serde(default = "Default::default")]
    pub identity: IdentityConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_url: Self::default_api_url(),
            redis_url: Default::default(),
            jobs_dir: Self::default_jobs_dir(),
            container_method: Default::default(),
            enabled_run_methods: Self::default_enabled_run_methods(),
            default_run_method: Default::default(),
            local: Default::default(),
            batch: Default::default(),
            hpc: Default::default(),
            loop_timing: Default::default(),
            cleanup: Default::default(),
            telemetry: Default::default(),
            identity: Default::default(),
        }
    }
}

impl AgentConfig {
    pub fn default_api_url() -> String {
        "http://localhost:3000".to_string()
    }
    pub fn default_jobs_dir() -> PathBuf {
        PathBuf::from("jobs")
    }
    pub fn default_enabled_run_methods() -> Vec<RunMethod> {
        vec![RunMethod::Local]
    }

    pub fn load(paths: &[PathBuf]) -> anyhow::Result<Self> {
        Ok(build_config(paths)?.try_deserialize()?)
    }

    pub fn is_enabled(&self, run_method: RunMethod) -> bool {
        self.enabled_run_methods.contains(&run_method)
    }

    /// The configured default when it is enabled, else the first enabled method.
    pub fn effective_default_run_method(&self) -> Option<RunMethod> {
        self.default_run_method
            .filter(|method| self.is_enabled(*method))
            .or_else(|| self.enabled_run_methods.first().copied())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    #[serde(default = "LocalConfig::default_max_simultaneous")]
    pub max_simultaneous: usize,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            max_simultaneous: Self::default_max_simultaneous(),
        }
    }
}

impl LocalConfig {
    pub fn default_max_simultaneous() -> usize {
        2
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "BatchConfig::default_max_simultaneous")]
    pub max_simultaneous: usize,
    #[serde(default = "Default::default")]
    pub job_queue: String,
    #[serde(default = "Default::default")]
    pub region: Option<String>,
    /// Execution role handed to registered job definitions.
    #[serde(default = "Default::default")]
    pub execution_role_arn: Option<String>,
    #[serde(default = "BatchConfig::default_timeout_buffer_secs")]
    pub timeout_buffer_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_simultaneous: Self::default_max_simultaneous(),
            job_queue: Default::default(),
            region: Default::default(),
            execution_role_arn: Default::default(),
            timeout_buffer_secs: Self::default_timeout_buffer_secs(),
        }
    }
}

impl BatchConfig {
    pub fn default_max_simultaneous() -> usize {
        20
    }
    pub fn default_timeout_buffer_secs() -> u64 {
        600
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HpcConfig {
    #[serde(default = "HpcConfig::default_max_simultaneous_groups")]
    pub max_simultaneous_groups: usize,
    #[serde(default = "HpcConfig::default_node_cpu_capacity")]
    pub node_cpu_capacity: u32,
    #[serde(default = "HpcConfig::default_debounce_secs")]
    pub debounce_secs: u64,
    #[serde(default = "Default::default")]
    pub cpu_partition: Option<String>,
    #[serde(default = "Default::default")]
    pub gpu_partition: Option<String>,
    #[serde(default = "HpcConfig::default_housekeeping_interval_secs")]
    pub housekeeping_interval_secs: u64,
    #[serde(default = "HpcConfig::default_artifact_max_age_hours")]
    pub artifact_max_age_hours: u64,
    #[serde(default = "HpcConfig::default_scripts_dir")]
    pub scripts_dir: PathBuf,
    #[serde(default = "HpcConfig::default_group_assignments_dir")]
    pub group_assignments_dir: PathBuf,
}

impl Default for HpcConfig {
    fn default() -> Self {
        Self {
            max_simultaneous_groups: Self::default_max_simultaneous_groups(),
            node_cpu_capacity: Self::default_node_cpu_capacity(),
            debounce_secs: Self::default_debounce_secs(),
            cpu_partition: Default::default(),
            gpu_partition: Default::default(),
            housekeeping_interval_secs: Self::default_housekeeping_interval_secs(),
            artifact_max_age_hours: Self::default_artifact_max_age_hours(),
            scripts_dir: Self::default_scripts_dir(),
            group_assignments_dir: Self::default_group_assignments_dir(),
        }
    }
}

impl HpcConfig {
    pub fn default_max_simultaneous_groups() -> usize {
        5
    }
    pub fn default_node_cpu_capacity() -> u32 {
        100
    }
    pub fn default_debounce_secs() -> u64 {
        5
    }
    pub fn default_housekeeping_interval_secs() -> u64 {
        300
    }
    pub fn default_artifact_max_age_hours() -> u64 {
        48
    }
    pub fn default_scripts_dir() -> PathBuf {
        PathBuf::from("slurm_scripts")
    }
    pub fn default_group_assignments_dir() -> PathBuf {
        PathBuf::from("slurm_group_assignments")
    }

    pub fn settings(&self) -> HpcSettings {
        HpcSettings {
            max_simultaneous_groups: self.max_simultaneous_groups,
            node_cpu_capacity: self.node_cpu_capacity,
            debounce: Duration::from_secs(self.debounce_secs),
            cpu_partition: self.cpu_partition.clone(),
            gpu_partition: self.gpu_partition.clone(),
            housekeeping_interval: Duration::from_secs(self.housekeeping_interval_secs),
            artifact_max_age: Duration::from_secs(self.artifact_max_age_hours * 3600),
            scripts_dir: self.scripts_dir.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopTimingConfig {
    #[serde(default = "LoopTimingConfig::default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "LoopTimingConfig::default_warm_up_secs")]
    pub warm_up_secs: u64,
    #[serde(default = "LoopTimingConfig::default_min_sleep_ms")]
    pub min_sleep_ms: u64,
    #[serde(default = "LoopTimingConfig::default_max_sleep_ms")]
    pub max_sleep_ms: u64,
}

impl Default for LoopTimingConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: Self::default_refresh_interval_secs(),
            warm_up_secs: Self::default_warm_up_secs(),
            min_sleep_ms: Self::default_min_sleep_ms(),
            max_sleep_ms: Self::default_max_sleep_ms(),
        }
    }
}

impl LoopTimingConfig {
    pub fn default_refresh_interval_secs() -> u64 {
        600
    }
    pub fn default_warm_up_secs() -> u64 {
        60
    }
    pub fn default_min_sleep_ms() -> u64 {
        10
    }
    pub fn default_max_sleep_ms() -> u64 {
        2000
    }

    pub fn timing(&self) -> LoopTiming {
        LoopTiming::builder()
            .refresh_interval(Duration::from_secs(self.refresh_interval_secs))
            .warm_up(Duration::from_secs(self.warm_up_secs))
            .min_sleep(Duration::from_millis(self.min_sleep_ms))
            .max_sleep(Duration::from_millis(self.max_sleep_ms))
            .build()
    }
}

/// Removal of abandoned job directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    #[serde(default = "CleanupConfig::default_max_age_hours")]
    pub max_age_hours: u64,
    #[serde(default = "CleanupConfig::default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            max_age_hours: Self::default_max_age_hours(),
            interval_secs: Self::default_interval_secs(),
        }
    }
}

impl CleanupConfig {
    pub fn default_max_age_hours() -> u64 {
        24
    }
    pub fn default_interval_secs() -> u64 {
        3600
    }
}

/// Compute resource credentials. The environment wins over the file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IdentityConfig {
    #[serde(default = "Default::default")]
    pub compute_resource_id: Option<String>,
    /// Hex encoded Ed25519 seed.
    #[serde(default = "Default::default")]
    pub private_key: Option<String>,
}

impl IdentityConfig {
    /// `(id, private key)`, or the name of the first missing variable.
    pub fn resolve(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(String, String), &'static str> {
        let id = lookup(env::COMPUTE_RESOURCE_ID)
            .or_else(|| self.compute_resource_id.clone())
            .filter(|id| !id.is_empty())
            .ok_or(env::COMPUTE_RESOURCE_ID)?;
        let key = lookup(env::COMPUTE_RESOURCE_PRIVATE_KEY)
            .or_else(|| self.private_key.clone())
            .filter(|key| !key.is_empty())
            .ok_or(env::COMPUTE_RESOURCE_PRIVATE_KEY)?;
        Ok((id, key))
    }
}

/// `path` itself when absolute, else `path` under `base`.
pub fn absolute(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn test_defaults() {
        let config: AgentConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.jobs_dir, PathBuf::from("jobs"));
        assert_eq!(config.enabled_run_methods, vec![RunMethod::Local]);
        assert_eq!(config.local.max_simultaneous, 2);
        assert_eq!(config.batch.max_simultaneous, 20);
        assert_eq!(config.batch.timeout_buffer_secs, 600);
        assert_eq!(config.hpc.max_simultaneous_groups, 5);
        assert_eq!(config.hpc.node_cpu_capacity, 100);
        assert_eq!(config.loop_timing.refresh_interval_secs, 600);
        assert_eq!(config.cleanup.max_age_hours, 24);
    }

    #[test]
    fn test_yaml_sections() {
        let config: AgentConfig = serde_yaml::from_str(indoc! {"
            api_url: https://coordination.example.org
            container_method: apptainer
            enabled_run_methods: [local, slurm]
            default_run_method: hpc
            hpc:
              node_cpu_capacity: 64
              gpu_partition: gpu
        "})
        .unwrap();
        assert_eq!(config.container_method, Some(ContainerRuntime::Singularity));
        assert_eq!(config.enabled_run_methods, vec![RunMethod::Local, RunMethod::Hpc]);
        let settings = config.hpc.settings();
        assert_eq!(settings.node_cpu_capacity, 64);
        assert_eq!(settings.gpu_partition.as_deref(), Some("gpu"));
        assert_eq!(settings.debounce, Duration::from_secs(5));
        assert_eq!(config.effective_default_run_method(), Some(RunMethod::Hpc));
    }

    #[test]
    fn test_disabled_default_run_method_falls_back() {
        let config = AgentConfig {
            default_run_method: Some(RunMethod::Batch),
            ..Default::default()
        };
        assert_eq!(config.effective_default_run_method(), Some(RunMethod::Local));
    }

    #[test]
    fn test_identity_prefers_environment() {
        let identity = IdentityConfig {
            compute_resource_id: Some("from-file".into()),
            private_key: Some("aa".into()),
        };
        let (id, key) = identity
            .resolve(|name| (name == env::COMPUTE_RESOURCE_ID).then(|| "from-env".to_string()))
            .unwrap();
        assert_eq!(id, "from-env");
        assert_eq!(key, "aa");
    }

    #[test]
    fn test_missing_identity() {
        let missing = IdentityConfig::default().resolve(|_| None).unwrap_err();
        assert_eq!(missing, env::COMPUTE_RESOURCE_ID);
    }

    #[test]
    fn test_build_config_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.yaml");
        std::fs::write(&path, "local:\n  max_simultaneous: 7\n").unwrap();
        let config = AgentConfig::load(&[path]).unwrap();
        assert_eq!(config.local.max_simultaneous, 7);
    }
}
