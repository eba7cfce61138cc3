//! Retry and backoff policy.
//!
//! This module encapsulates transfer failure classification (network blips vs
//! bad repositories, remote authorization, full disks) and exponential backoff
//! decisions so the scheduler applies one consistent policy to every job.

mod classify;
mod policy;

pub use classify::{classify_http_status, classify_io_error, classify_tool_failure};
pub use policy::{RetryDecision, RetryPolicy};
