//! `hubq remove <id>` – remove a finished job from the list.

use anyhow::Result;
use hubq_core::{DownloadJob, JobId};
use std::path::Path;

use crate::cli::control_socket::ControlClient;
use crate::cli::protocol::Request;

pub async fn run_remove(socket: &Path, token: Option<&str>, id: JobId) -> Result<()> {
    let mut client = ControlClient::connect(socket).await?;
    let job: DownloadJob = client.call(token, Request::Remove { id }).await?;
    println!("Removed job {} ({})", job.id, job.status.as_str());
    Ok(())
}
