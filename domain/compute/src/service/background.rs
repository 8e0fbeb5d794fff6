/// Long-running service started with the daemon.
#[async_trait::async_trait]
pub trait BackgroundService: Send + Sync {
    async fn run(&self);
}
