mod app_registry;
mod attempts;
mod backend;
mod dispatch;
mod monitor;
mod orchestration;
mod runner;

pub use app_registry::AppRegistryServiceImpl;
pub use attempts::AttemptTracker;
pub use backend::*;
pub use dispatch::{ChildCommand, DispatchSettings, JobDispatchServiceImpl};
pub use monitor::*;
pub use orchestration::{LoopTiming, OrchestrationService};
pub use runner::{JobRunContext, JobRunnerService, CANCEL_MARKER_KEY, INTERNAL_DIR_NAME};
