pub mod env;
pub mod execution_mode;
pub mod group;
pub mod launch;
pub mod resources;
pub mod run_method;
pub mod sample;
pub mod spec;
pub mod status;

#[rustfmt::skip]
pub use {
    execution_mode::{ContainerRuntime, ExecutionMode},
    group::PendingJobGroup,
    launch::{DispatchMode, DispatchOutcome, LaunchSpec},
    resources::RequiredResources,
    run_method::RunMethod,
    sample::{GpuLoad, ResourceSample},
    spec::{AppDescriptor, AppSpec, ComputeResourceSpec, ProcessorSpec},
    status::JobStatus,
};
