use std::time::Duration;

use async_trait::async_trait;
use domain_compute::service::BackgroundService;
use futures::StreamExt;
use infrastructure_command::WakeUpMessage;
use tracing::{debug, info, warn};

/// Forwards wake-up messages from the redis channel of this compute resource
/// to the orchestration loop.
pub struct RedisWakeUpSubscriber {
    redis_url: String,
    channel: String,
    sender: flume::Sender<WakeUpMessage>,
    retry_delay: Duration,
}

impl RedisWakeUpSubscriber {
    pub fn new(
        redis_url: impl Into<String>,
        channel: impl Into<String>,
        sender: flume::Sender<WakeUpMessage>,
    ) -> Self {
        Self {
            redis_url: redis_url.into(),
            channel: channel.into(),
            sender,
            retry_delay: Duration::from_secs(10),
        }
    }

    /// Returns once the connection drops.
    async fn listen(&self) -> anyhow::Result<()> {
        let client = redis::Client::open(self.redis_url.as_str())?;
        let mut pubsub = client.get_async_connection().await?.into_pubsub();
        pubsub.subscribe(&self.channel).await?;
        info!("Subscribed to {}", self.channel);
        let mut messages = pubsub.on_message();
        while let Some(msg) = messages.next().await {
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Unreadable payload on {}: {e}", self.channel);
                    continue;
                }
            };
            let Some(message) = parse_wake_up(&payload) else {
                continue;
            };
            if self.sender.send_async(message).await.is_err() {
                // Nobody listens anymore.
                return Ok(());
            }
        }
        anyhow::bail!("Subscription to {} closed", self.channel)
    }
}

/// Unknown or malformed messages are dropped.
pub fn parse_wake_up(payload: &str) -> Option<WakeUpMessage> {
    match serde_json::from_str(payload) {
        Ok(message) => Some(message),
        Err(e) => {
            debug!("Ignoring message {payload}: {e}");
            None
        }
    }
}

#[async_trait]
impl BackgroundService for RedisWakeUpSubscriber {
    async fn run(&self) {
        loop {
            match self.listen().await {
                Ok(()) => return,
                Err(e) => warn!(
                    "Pub/sub unavailable ({e}), retrying in {}s",
                    self.retry_delay.as_secs()
                ),
            }
            tokio::time::sleep(self.retry_delay).await;
        }
    }
}
