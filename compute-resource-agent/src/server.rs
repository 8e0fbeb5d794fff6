use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use domain_compute::service::BackgroundService;
use tokio::task::JoinHandle;
use tracing::{info, Instrument};

use crate::config::AgentConfig;
use crate::infrastructure::{
    service_provider::ServiceProvider, signing::ComputeResourceIdentity,
};

/// Run the daemon until ctrl-c or until `timeout` ends the orchestration loop.
pub async fn run(
    config: AgentConfig,
    identity: Arc<ComputeResourceIdentity>,
    timeout: Option<Duration>,
) {
    let service_provider = match ServiceProvider::build(&config, identity, timeout) {
        Ok(x) => x,
        Err(e) => {
            return eprintln!("{}: {e}", "Cannot build Service Provider".red());
        }
    };
    let handles = service_provider
        .helpers()
        .into_iter()
        .map(|(name, service)| {
            tokio::spawn(
                async move { service.run().await }
                    .instrument(tracing::trace_span!("background_service", service = name)),
            )
        })
        .collect::<Vec<JoinHandle<()>>>();
    let orchestration = service_provider.orchestration.clone();
    let mut orchestration = tokio::spawn(
        async move { orchestration.run().await }
            .instrument(tracing::trace_span!("orchestration")),
    );
    println!("Compute resource agent started.");

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                eprintln!("{}: {e}", "Unable to listen for ctrl-c".red());
            }
            info!("Stopping services (ctrl-c handling).");
            orchestration.abort();
        }
        finished = &mut orchestration => {
            if let Err(e) = finished {
                eprintln!("{}: {e}", "Orchestration loop crashed".red());
            }
            info!("Orchestration finished, stopping services.");
        }
    }
    for handle in handles {
        handle.abort()
    }
}
