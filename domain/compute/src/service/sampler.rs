use async_trait::async_trait;

use crate::model::vo::ResourceSample;

#[async_trait]
pub trait SystemSampler: Send + Sync {
    /// Best effort; GPU data is left empty when unavailable.
    async fn sample(&self) -> anyhow::Result<ResourceSample>;
}
