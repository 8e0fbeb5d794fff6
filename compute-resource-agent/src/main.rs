use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use compute_resource_agent::{
    config::AgentConfig,
    infrastructure::signing::ComputeResourceIdentity,
    job_process::{self, MonitorKind},
    server,
    telemetry::initialize_telemetry,
};
use domain_compute::model::vo::env;

#[derive(Parser, Debug)]
#[command(name = "compute-resource-agent")]
#[command(version)]
#[command(about = "Runs jobs assigned to this compute resource")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the daemon
    Start {
        /// Extra YAML config files, later ones win
        #[arg(long = "config")]
        config: Vec<PathBuf>,
        /// Stop after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Wrap one job; configured through the environment
    RunJob,
    /// Watch one aspect of a running job
    Monitor {
        #[arg(value_enum)]
        kind: MonitorKind,
        #[arg(long)]
        parent_pid: u32,
    },
    /// Generate a compute resource key pair
    InitKeys,
}

#[tokio::main]
async fn main() {
    match Cli::parse().command {
        Commands::Start { config, timeout } => start(config, timeout).await,
        Commands::RunJob => {
            if let Err(e) = job_process::run_job().await {
                eprintln!("{}: {e}", "Job failed".red());
                std::process::exit(1);
            }
        }
        Commands::Monitor { kind, parent_pid } => {
            if let Err(e) = job_process::run_monitor(kind, parent_pid).await {
                eprintln!("{}: {e:#}", "Monitor failed".red());
                std::process::exit(1);
            }
        }
        Commands::InitKeys => {
            let identity = ComputeResourceIdentity::generate();
            println!("export {}={}", env::COMPUTE_RESOURCE_ID, identity.id());
            println!(
                "export {}={}",
                env::COMPUTE_RESOURCE_PRIVATE_KEY,
                identity.private_key_hex()
            );
        }
    }
}

async fn start(paths: Vec<PathBuf>, timeout: Option<u64>) {
    let config = match AgentConfig::load(&paths) {
        Ok(x) => x,
        Err(e) => {
            eprintln!("{}: {e}", "Failed to build config".red());
            std::process::exit(1);
        }
    };
    if let Err(e) = initialize_telemetry(&config.telemetry) {
        eprintln!("{}: {e}", "Failed to initialize logger".red());
        return;
    }
    let identity = config
        .identity
        .resolve(|name| std::env::var(name).ok())
        .map_err(|name| anyhow::anyhow!("{name} is not set"))
        .and_then(|(id, key)| ComputeResourceIdentity::from_hex(id, &key));
    let identity = match identity {
        Ok(x) => Arc::new(x),
        Err(e) => {
            eprintln!("{}: {e}", "Missing compute resource identity".red());
            std::process::exit(1);
        }
    };
    server::run(config, identity, timeout.map(Duration::from_secs)).await;
}
