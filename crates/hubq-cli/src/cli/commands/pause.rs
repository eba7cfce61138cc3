//! `hubq pause <id>` – pause a downloading job.

use anyhow::Result;
use hubq_core::{DownloadJob, JobId, JobStatus};
use std::path::Path;

use crate::cli::control_socket::ControlClient;
use crate::cli::protocol::Request;

pub async fn run_pause(socket: &Path, token: Option<&str>, id: JobId) -> Result<()> {
    let mut client = ControlClient::connect(socket).await?;
    let job: DownloadJob = client.call(token, Request::Pause { id }).await?;
    if job.status == JobStatus::Paused {
        println!("Paused job {}", job.id);
    } else {
        // The executor is still letting go; the status event follows.
        println!("Pause requested for job {} ({})", job.id, job.status.as_str());
    }
    Ok(())
}
