//! `hubq show <id>` – print one job as JSON.

use anyhow::Result;
use hubq_core::broadcast::JobView;
use hubq_core::JobId;
use std::path::Path;

use crate::cli::control_socket::{to_pretty, ControlClient};
use crate::cli::protocol::Request;

pub async fn run_show(socket: &Path, token: Option<&str>, id: JobId) -> Result<()> {
    let mut client = ControlClient::connect(socket).await?;
    let view: JobView = client.call(token, Request::Get { id }).await?;
    println!("{}", to_pretty(&view)?);
    Ok(())
}
