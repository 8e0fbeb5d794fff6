pub mod app_loader;
pub mod cloud_batch;
pub mod disk_cleanup;
pub mod http_client;
pub mod key_value_store;
pub mod process;
pub mod pubsub;
pub mod service_provider;
pub mod signing;
pub mod slurm_client;
pub mod system_sampler;
