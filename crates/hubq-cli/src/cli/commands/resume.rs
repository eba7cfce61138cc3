//! `hubq resume <id>` – put a paused job back in the queue.

use anyhow::Result;
use hubq_core::{DownloadJob, JobId};
use std::path::Path;

use crate::cli::control_socket::ControlClient;
use crate::cli::protocol::Request;

pub async fn run_resume(socket: &Path, token: Option<&str>, id: JobId) -> Result<()> {
    let mut client = ControlClient::connect(socket).await?;
    let job: DownloadJob = client.call(token, Request::Resume { id }).await?;
    println!("Resumed job {} ({})", job.id, job.status.as_str());
    Ok(())
}
