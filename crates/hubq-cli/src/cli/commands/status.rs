//! `hubq status` – list jobs.

use anyhow::Result;
use hubq_core::broadcast::JobView;
use hubq_core::store::{JobQuery, SortDirection, SortKey};
use hubq_core::JobStatus;
use std::path::Path;

use super::{format_progress, format_rate};
use crate::cli::control_socket::ControlClient;
use crate::cli::protocol::Request;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusArgs {
    pub status: Option<JobStatus>,
    pub search: Option<String>,
    pub sort: SortKey,
    pub direction: SortDirection,
}

impl From<StatusArgs> for JobQuery {
    fn from(args: StatusArgs) -> Self {
        JobQuery {
            status: args.status,
            search: args.search,
            sort: args.sort,
            direction: args.direction,
        }
    }
}

pub async fn run_status(socket: &Path, token: Option<&str>, args: StatusArgs) -> Result<()> {
    let mut client = ControlClient::connect(socket).await?;
    let jobs: Vec<JobView> = client
        .call(
            token,
            Request::List {
                query: args.into(),
            },
        )
        .await?;
    if jobs.is_empty() {
        println!("No jobs.");
        return Ok(());
    }
    println!("{:<6} {:<12} {:<36} {}", "ID", "STATE", "REPOSITORY", "PROGRESS");
    for view in jobs {
        let job = &view.job;
        let mut line = format!(
            "{:<6} {:<12} {:<36} {}{}",
            job.id,
            job.status.as_str(),
            job.spec.repository_id,
            format_progress(job),
            format_rate(&view)
        );
        if let Some(err) = &job.error {
            line.push_str(&format!("  [{}] {}", err.kind.as_str(), err.message));
        }
        println!("{line}");
    }
    Ok(())
}
