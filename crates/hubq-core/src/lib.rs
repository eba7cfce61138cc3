pub mod config;
pub mod error;
pub mod logging;

pub mod auth;
pub mod broadcast;
pub mod gateway;
pub mod job;
pub mod orchestrator;
pub mod retry;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod transfer;

pub use error::HubqError;
pub use job::{DownloadJob, JobId, JobSpec, JobStatus};
pub use orchestrator::Orchestrator;
