//! `hubq retry <id>` – run a failed, cancelled or completed job again.

use anyhow::Result;
use hubq_core::{DownloadJob, JobId};
use std::path::Path;

use crate::cli::control_socket::ControlClient;
use crate::cli::protocol::Request;

pub async fn run_retry(socket: &Path, token: Option<&str>, id: JobId, resume: bool) -> Result<()> {
    let mut client = ControlClient::connect(socket).await?;
    let job: DownloadJob = client.call(token, Request::Retry { id, resume }).await?;
    println!(
        "Retrying job {} (attempt {}, {})",
        job.id,
        job.attempt_count,
        if resume { "resuming" } else { "from scratch" }
    );
    Ok(())
}
