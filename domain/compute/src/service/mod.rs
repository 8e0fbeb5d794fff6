mod app_registry;
mod background;
mod backend;
mod clock;
mod cloud_batch;
mod coordination;
mod dispatch;
mod hpc;
mod process;
mod sampler;

#[rustfmt::skip]
pub use {
    app_registry::{AppLoader, AppRegistryService},
    background::BackgroundService,
    backend::BackendManager,
    clock::{Clock, SystemClock},
    cloud_batch::{CloudBatchService, CloudBatchSubmission},
    coordination::CoordinationService,
    dispatch::JobDispatchService,
    hpc::{HpcSubmission, HpcSubmitter},
    process::{ProcessHandle, ProcessLauncher},
    sampler::SystemSampler,
};
