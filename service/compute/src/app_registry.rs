use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use domain_compute::{
    model::{
        entity::App,
        vo::{ComputeResourceSpec, RunMethod},
    },
    service::{AppLoader, AppRegistryService, CloudBatchService, CoordinationService},
};
use tokio::sync::RwLock;
use tracing::{info, warn};
use typed_builder::TypedBuilder;

/// Keeps the loaded apps in sync with the apps assigned upstream.
#[derive(TypedBuilder)]
pub struct AppRegistryServiceImpl {
    coordination: Arc<dyn CoordinationService>,
    loader: Arc<dyn AppLoader>,
    /// Present when the cloud batch run method is enabled.
    #[builder(default)]
    cloud_batch: Option<Arc<dyn CloudBatchService>>,
    #[builder(default)]
    default_run_method: Option<RunMethod>,
    available_run_methods: Vec<RunMethod>,
    #[builder(default, setter(skip))]
    apps: RwLock<Vec<App>>,
    #[builder(default, setter(skip))]
    published: AtomicBool,
}

#[async_trait]
impl AppRegistryService for AppRegistryServiceImpl {
    async fn refresh(&self) -> anyhow::Result<bool> {
        let descriptors = self.coordination.get_apps().await?;
        let wanted: HashSet<&str> = descriptors.iter().map(|d| d.spec_uri.as_str()).collect();
        let known: HashSet<String> = self
            .apps
            .read()
            .await
            .iter()
            .map(|app| app.spec_uri.clone())
            .collect();

        // Specs are fetched without holding the lock so lookups keep working.
        let mut loaded: Vec<App> = Vec::new();
        for descriptor in descriptors.iter() {
            if known.contains(&descriptor.spec_uri)
                || loaded.iter().any(|app| app.spec_uri == descriptor.spec_uri)
            {
                continue;
            }
            let spec = match self.loader.load(&descriptor.spec_uri).await {
                Ok(spec) => spec,
                Err(e) => {
                    warn!(
                        "Unable to load app {} from {}: {e:#}",
                        descriptor.name, descriptor.spec_uri
                    );
                    continue;
                }
            };
            let app = App::new(descriptor.spec_uri.clone(), spec);
            self.register_job_definition(&app).await;
            loaded.push(app);
        }

        let mut changed = !loaded.is_empty();
        {
            let mut apps = self.apps.write().await;
            apps.retain(|app| {
                let keep = wanted.contains(app.spec_uri.as_str());
                if !keep {
                    info!("Unloading app {} ({})", app.name(), app.spec_uri);
                    changed = true;
                }
                keep
            });
            for app in loaded {
                info!("Loaded app {} ({})", app.name(), app.spec_uri);
                apps.push(app);
            }
        }
        if changed {
            self.published.store(false, Ordering::Relaxed);
        }
        // Stays unpublished until a PUT succeeds, so a failed one is retried.
        if !self.published.load(Ordering::Relaxed) {
            let spec = self.capability_spec().await;
            self.coordination.put_spec(&spec).await?;
            self.published.store(true, Ordering::Relaxed);
        }
        Ok(changed)
    }

    async fn find_app_for_processor(&self, processor_name: &str) -> Option<App> {
        self.apps
            .read()
            .await
            .iter()
            .find(|app| app.processor(processor_name).is_some())
            .cloned()
    }

    async fn loaded_apps(&self) -> Vec<App> {
        self.apps.read().await.clone()
    }
}

impl AppRegistryServiceImpl {
    /// Union of every loaded app plus the configured run methods.
    pub async fn capability_spec(&self) -> ComputeResourceSpec {
        ComputeResourceSpec {
            apps: self.apps.read().await.iter().map(|app| app.spec.clone()).collect(),
            default_run_method: self.default_run_method,
            available_run_methods: self.available_run_methods.clone(),
        }
    }

    async fn register_job_definition(&self, app: &App) {
        let (Some(cloud_batch), Some(image)) = (&self.cloud_batch, app.image()) else {
            return;
        };
        if let Err(e) = cloud_batch.ensure_job_definition(app.name(), image).await {
            warn!("Unable to register job definition for app {}: {e:#}", app.name());
        }
    }
}
