use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use domain_compute::{
    model::vo::{env, RunMethod},
    service::{
        AppRegistryService, BackendManager, BackgroundService, CloudBatchService,
        CoordinationService, JobDispatchService, SystemClock,
    },
};
use infrastructure_command::channel_name;
use service_compute::{
    AppRegistryServiceImpl, AttemptTracker, CapacityBackendManager, DispatchSettings,
    HpcBackendManager, HpcSettings, JobDispatchServiceImpl, OrchestrationService,
};
use tracing::{info, warn};

use super::{
    app_loader::SpecLoader, cloud_batch::AwsBatchClient, disk_cleanup::DiskCleanupService,
    http_client::CoordinationClient, key_value_store::FileKeyValueStore,
    process::TokioProcessLauncher, pubsub::RedisWakeUpSubscriber, signing::ComputeResourceIdentity,
    slurm_client::SlurmClient,
};
use crate::config::{absolute, AgentConfig};

/// Every long-lived component of the daemon, wired from configuration.
pub struct ServiceProvider {
    pub coordination: Arc<dyn CoordinationService>,
    pub app_registry: Arc<dyn AppRegistryService>,
    pub backends: Vec<Arc<dyn BackendManager>>,
    pub orchestration: Arc<OrchestrationService>,
    pub subscriber: Option<Arc<RedisWakeUpSubscriber>>,
    pub disk_cleanup: Arc<DiskCleanupService>,
}

impl ServiceProvider {
    pub fn build(
        config: &AgentConfig,
        identity: Arc<ComputeResourceIdentity>,
        timeout: Option<Duration>,
    ) -> anyhow::Result<Self> {
        let base_dir = std::env::current_dir()?;
        let jobs_dir = absolute(&base_dir, &config.jobs_dir);

        let http_client = Arc::new(
            reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()?,
        );
        let coordination: Arc<dyn CoordinationService> = Arc::new(CoordinationClient::new(
            http_client.clone(),
            config.api_url.clone(),
            Some(identity.clone()),
        ));
        let launcher = Arc::new(TokioProcessLauncher);
        let tracker = Arc::new(AttemptTracker::new());

        let cloud_batch: Option<Arc<dyn CloudBatchService>> = if config
            .is_enabled(RunMethod::Batch)
        {
            if config.batch.job_queue.is_empty() {
                warn!("Batch run method is enabled without batch.job_queue");
            }
            Some(Arc::new(AwsBatchClient::new(
                config.batch.job_queue.clone(),
                config.batch.region.clone(),
                config.batch.execution_role_arn.clone(),
            )))
        } else {
            None
        };

        let app_registry: Arc<dyn AppRegistryService> = Arc::new(
            AppRegistryServiceImpl::builder()
                .coordination(coordination.clone())
                .loader(Arc::new(SpecLoader::new(http_client.clone())?))
                .cloud_batch(cloud_batch.clone())
                .default_run_method(config.effective_default_run_method())
                .available_run_methods(config.enabled_run_methods.clone())
                .build(),
        );

        let settings = DispatchSettings::builder()
            .jobs_dir(jobs_dir.clone())
            .agent_executable(std::env::current_exe()?)
            .container_runtime(config.container_method)
            .batch_enabled(cloud_batch.is_some())
            .batch_timeout_buffer(Duration::from_secs(config.batch.timeout_buffer_secs))
            .passthrough_env(BTreeMap::from([(
                env::COORDINATION_API_URL.to_string(),
                config.api_url.clone(),
            )]))
            .build();
        let dispatcher: Arc<dyn JobDispatchService> = Arc::new(
            JobDispatchServiceImpl::builder()
                .settings(settings)
                .app_registry(app_registry.clone())
                .coordination(coordination.clone())
                .launcher(launcher)
                .cloud_batch(cloud_batch)
                .build(),
        );

        let mut backends: Vec<Arc<dyn BackendManager>> = Vec::new();
        for run_method in config.enabled_run_methods.iter().copied() {
            let backend: Arc<dyn BackendManager> = match run_method {
                RunMethod::Local => Arc::new(
                    CapacityBackendManager::builder()
                        .run_method(RunMethod::Local)
                        .max_simultaneous(config.local.max_simultaneous)
                        .dispatcher(dispatcher.clone())
                        .coordination(coordination.clone())
                        .tracker(tracker.clone())
                        .build(),
                ),
                RunMethod::Batch => Arc::new(
                    CapacityBackendManager::builder()
                        .run_method(RunMethod::Batch)
                        .max_simultaneous(config.batch.max_simultaneous)
                        .dispatcher(dispatcher.clone())
                        .coordination(coordination.clone())
                        .tracker(tracker.clone())
                        .build(),
                ),
                RunMethod::Hpc => {
                    let settings = HpcSettings {
                        scripts_dir: absolute(&base_dir, &config.hpc.scripts_dir),
                        ..config.hpc.settings()
                    };
                    let markers = FileKeyValueStore::new(absolute(
                        &base_dir,
                        &config.hpc.group_assignments_dir,
                    ));
                    Arc::new(
                        HpcBackendManager::builder()
                            .settings(settings)
                            .dispatcher(dispatcher.clone())
                            .coordination(coordination.clone())
                            .submitter(Arc::new(SlurmClient::default()))
                            .markers(Arc::new(markers))
                            .tracker(tracker.clone())
                            .clock(Arc::new(SystemClock))
                            .build(),
                    )
                }
            };
            backends.push(backend);
        }

        let (sender, receiver) = flume::unbounded();
        let subscriber = match &config.redis_url {
            Some(redis_url) => Some(Arc::new(RedisWakeUpSubscriber::new(
                redis_url.clone(),
                channel_name(identity.id()),
                sender,
            ))),
            None => {
                info!("No redis_url configured, relying on periodic refreshes");
                None
            }
        };

        let orchestration = Arc::new(
            OrchestrationService::builder()
                .coordination(coordination.clone())
                .app_registry(app_registry.clone())
                .backends(backends.clone())
                .tracker(tracker)
                .wake_ups(receiver)
                .timing(config.loop_timing.timing())
                .timeout(timeout)
                .build(),
        );
        let disk_cleanup = Arc::new(DiskCleanupService::new(
            jobs_dir,
            Duration::from_secs(config.cleanup.max_age_hours * 3600),
            Duration::from_secs(config.cleanup.interval_secs),
        ));

        Ok(Self {
            coordination,
            app_registry,
            backends,
            orchestration,
            subscriber,
            disk_cleanup,
        })
    }

    /// Services that run beside the orchestration loop until it ends.
    pub fn helpers(&self) -> Vec<(&'static str, Arc<dyn BackgroundService>)> {
        let mut services: Vec<(&'static str, Arc<dyn BackgroundService>)> =
            vec![("disk_cleanup", self.disk_cleanup.clone())];
        if let Some(subscriber) = &self.subscriber {
            services.push(("wake_up_subscriber", subscriber.clone()));
        }
        services
    }
}
