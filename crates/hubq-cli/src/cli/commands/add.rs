//! `hubq add <repository>` – submit a download.

use anyhow::Result;
use hubq_core::gateway::{SubmitReceipt, SubmitRequest};
use hubq_core::job::{RepoKind, SelectionMode};
use std::path::{Path, PathBuf};

use crate::cli::control_socket::ControlClient;
use crate::cli::protocol::Request;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddArgs {
    pub repository: String,
    pub kind: RepoKind,
    pub mode: SelectionMode,
    pub revision: Option<String>,
    pub files: Vec<String>,
    pub dest: Option<PathBuf>,
    pub accelerate: bool,
}

impl From<AddArgs> for SubmitRequest {
    fn from(args: AddArgs) -> Self {
        SubmitRequest {
            repository_id: args.repository,
            repository_kind: args.kind,
            destination_dir: args.dest,
            transfer_acceleration: args.accelerate,
            selection_mode: args.mode,
            revision: args.revision,
            files: if args.files.is_empty() {
                None
            } else {
                Some(args.files)
            },
        }
    }
}

pub async fn run_add(socket: &Path, token: Option<&str>, args: AddArgs) -> Result<()> {
    let mut client = ControlClient::connect(socket).await?;
    let receipt: SubmitReceipt = client
        .call(
            token,
            Request::Submit {
                request: args.into(),
            },
        )
        .await?;
    if receipt.deduplicated {
        println!(
            "Job {} already {} for {}",
            receipt.job_id,
            receipt.job.status.as_str(),
            receipt.job.spec.repository_id
        );
    } else {
        println!(
            "Added job {} for {} -> {}",
            receipt.job_id,
            receipt.job.spec.repository_id,
            receipt.job.spec.destination.display()
        );
    }
    Ok(())
}
