//! `hubq cancel <id>` – cancel a job.

use anyhow::Result;
use hubq_core::{DownloadJob, JobId, JobStatus};
use std::path::Path;

use crate::cli::control_socket::ControlClient;
use crate::cli::protocol::Request;

pub async fn run_cancel(socket: &Path, token: Option<&str>, id: JobId) -> Result<()> {
    let mut client = ControlClient::connect(socket).await?;
    let job: DownloadJob = client.call(token, Request::Cancel { id }).await?;
    if job.status == JobStatus::Cancelled {
        println!("Cancelled job {}", job.id);
    } else {
        // The executor is still letting go; the status event follows.
        println!("Cancel requested for job {} ({})", job.id, job.status.as_str());
    }
    Ok(())
}
