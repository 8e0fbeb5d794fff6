pub mod config;
pub mod dto;
pub mod infrastructure;
pub mod job_process;
pub mod server;
pub mod telemetry;
