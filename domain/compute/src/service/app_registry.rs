use async_trait::async_trait;

use crate::model::entity::App;
use crate::model::vo::AppSpec;

/// Apps currently loaded for this compute resource.
#[async_trait]
pub trait AppRegistryService: Send + Sync {
    /// Sync loaded apps with the assigned set; publish the aggregate spec when
    /// it changed. Returns whether the loaded set changed.
    async fn refresh(&self) -> anyhow::Result<bool>;

    /// First loaded app declaring a processor named `processor_name`.
    async fn find_app_for_processor(&self, processor_name: &str) -> Option<App>;

    async fn loaded_apps(&self) -> Vec<App>;
}

/// Fetches an app spec from its URI.
#[async_trait]
pub trait AppLoader: Send + Sync {
    async fn load(&self, spec_uri: &str) -> anyhow::Result<AppSpec>;
}
