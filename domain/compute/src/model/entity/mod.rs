pub mod app;
pub mod job;

#[rustfmt::skip]
pub use {
    app::App,
    job::{Job, JobCredentials},
};
