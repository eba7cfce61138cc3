//! `hubq watch [id]` – follow live events until the stream ends or Ctrl-C.

use anyhow::Result;
use hubq_core::broadcast::JobEventKind;
use hubq_core::transfer::ToolOutput;
use hubq_core::JobId;
use std::path::Path;

use super::{format_progress, format_rate};
use crate::cli::control_socket::ControlClient;
use crate::cli::protocol::Request;

pub async fn run_watch(socket: &Path, token: Option<&str>, id: Option<JobId>) -> Result<()> {
    let mut client = ControlClient::connect(socket).await?;
    client.send(token, Request::Watch { id }).await?;

    loop {
        let event = tokio::select! {
            event = client.next_event() => event?,
            _ = tokio::signal::ctrl_c() => return Ok(()),
        };
        let Some(event) = event else {
            return Ok(());
        };
        let view = &event.job;
        let job = &view.job;
        match event.kind {
            JobEventKind::Removed => println!("{:<6} removed", job.id),
            JobEventKind::Output => {
                if let Some(output) = &event.output {
                    println!("{}", format_output(job.id, output));
                }
                continue;
            }
            _ => println!(
                "{:<6} {:<12} {} {}{}",
                job.id,
                job.status.as_str(),
                job.spec.repository_id,
                format_progress(job),
                format_rate(view)
            ),
        }
        // A single-job stream stays open after the job settles; stop there.
        if id.is_some() && job.status.is_terminal() {
            return Ok(());
        }
    }
}

fn format_output(id: JobId, output: &ToolOutput) -> String {
    match output {
        ToolOutput::Started { command } => format!("{id:<6} $ {command}"),
        ToolOutput::Line { text } => format!("{id:<6} | {text}"),
        ToolOutput::Exited { code: Some(code) } => format!("{id:<6} tool exited with code {code}"),
        ToolOutput::Exited { code: None } => format!("{id:<6} tool killed"),
    }
}
