//! CLI for the hubq download orchestrator.

mod commands;
mod control_socket;
mod protocol;

use anyhow::Result;
use clap::{Parser, Subcommand};
use hubq_core::config;
use hubq_core::job::{JobId, JobStatus, RepoKind, SelectionMode};
use hubq_core::logging;
use hubq_core::store::{SortDirection, SortKey};
use std::path::PathBuf;

use commands::{
    run_add, run_cancel, run_pause, run_remove, run_resume, run_retry, run_serve, run_show,
    run_status, run_token, run_watch, AddArgs, StatusArgs,
};

/// Top-level CLI for hubq.
#[derive(Debug, Parser)]
#[command(name = "hubq")]
#[command(about = "hubq: background downloads of hub model, dataset and space repositories", long_about = None)]
pub struct Cli {
    /// Bearer token for the daemon.
    #[arg(long, global = true, env = "HUBQ_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Control socket path (default: $XDG_STATE_HOME/hubq/control.sock).
    #[arg(long, global = true, value_name = "PATH")]
    pub socket: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

fn parse_kind(s: &str) -> Result<RepoKind, String> {
    RepoKind::parse(s).ok_or_else(|| format!("unknown repository kind {s:?} (model|dataset|space)"))
}

fn parse_mode(s: &str) -> Result<SelectionMode, String> {
    SelectionMode::parse(s).ok_or_else(|| format!("unknown selection mode {s:?} (full|branch|files)"))
}

fn parse_status(s: &str) -> Result<JobStatus, String> {
    JobStatus::parse(s).ok_or_else(|| format!("unknown status {s:?}"))
}

fn parse_sort(s: &str) -> Result<SortKey, String> {
    SortKey::parse(s).ok_or_else(|| format!("unknown sort key {s:?} (created|status|repository_id|size)"))
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run the orchestrator daemon and listen on the control socket.
    Serve,

    /// Submit a repository download.
    Add {
        /// Repository id, e.g. `facebook/opt-125m`.
        repository: String,

        /// Repository kind.
        #[arg(long, default_value = "model", value_parser = parse_kind)]
        kind: RepoKind,

        /// What to fetch.
        #[arg(long, default_value = "full", value_parser = parse_mode)]
        mode: SelectionMode,

        /// Branch, tag or commit (required with `--mode branch`).
        #[arg(long)]
        revision: Option<String>,

        /// File to fetch (repeat; requires `--mode files`).
        #[arg(long = "file", value_name = "PATH")]
        files: Vec<String>,

        /// Destination directory inside the models directory (relative or absolute).
        #[arg(long, value_name = "DIR")]
        dest: Option<PathBuf>,

        /// Disable accelerated transfer.
        #[arg(long)]
        no_accel: bool,
    },

    /// List jobs.
    Status {
        /// Only jobs in this state.
        #[arg(long, value_parser = parse_status)]
        status: Option<JobStatus>,

        /// Case-insensitive match on repository id or job id.
        #[arg(long)]
        search: Option<String>,

        /// Sort key.
        #[arg(long, default_value = "created", value_parser = parse_sort)]
        sort: SortKey,

        /// Ascending order (default is descending).
        #[arg(long)]
        asc: bool,
    },

    /// Show one job as JSON.
    Show {
        /// Job identifier.
        id: JobId,
    },

    /// Pause a downloading job.
    Pause {
        /// Job identifier.
        id: JobId,
    },

    /// Resume a paused job.
    Resume {
        /// Job identifier.
        id: JobId,
    },

    /// Cancel a job.
    Cancel {
        /// Job identifier.
        id: JobId,
    },

    /// Retry a failed, cancelled or completed job.
    Retry {
        /// Job identifier.
        id: JobId,

        /// Keep already downloaded bytes instead of starting over.
        #[arg(long)]
        resume: bool,
    },

    /// Remove a finished job from the list.
    Remove {
        /// Job identifier.
        id: JobId,
    },

    /// Stream events for one job, or for all jobs when no id is given.
    Watch {
        /// Job identifier.
        id: Option<JobId>,
    },

    /// Mint a bearer token for the configured secret.
    Token {
        /// Token subject.
        #[arg(long, default_value = "hubq")]
        subject: String,

        /// Lifetime in seconds (default: no expiry).
        #[arg(long, value_name = "SECS")]
        ttl: Option<u64>,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        if matches!(cli.command, CliCommand::Serve) {
            if let Err(e) = logging::init_logging() {
                logging::init_logging_stderr();
                tracing::warn!("file logging unavailable, using stderr: {e:#}");
            }
        } else {
            logging::init_logging_stderr();
        }

        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);
        let socket = match cli.socket {
            Some(path) => path,
            None => config::control_socket_path()?,
        };
        let token = cli.token.as_deref();

        match cli.command {
            CliCommand::Serve => run_serve(&cfg, &socket).await?,
            CliCommand::Add {
                repository,
                kind,
                mode,
                revision,
                files,
                dest,
                no_accel,
            } => {
                let args = AddArgs {
                    repository,
                    kind,
                    mode,
                    revision,
                    files,
                    dest,
                    accelerate: !no_accel,
                };
                run_add(&socket, token, args).await?
            }
            CliCommand::Status {
                status,
                search,
                sort,
                asc,
            } => {
                let args = StatusArgs {
                    status,
                    search,
                    sort,
                    direction: if asc {
                        SortDirection::Asc
                    } else {
                        SortDirection::Desc
                    },
                };
                run_status(&socket, token, args).await?
            }
            CliCommand::Show { id } => run_show(&socket, token, id).await?,
            CliCommand::Pause { id } => run_pause(&socket, token, id).await?,
            CliCommand::Resume { id } => run_resume(&socket, token, id).await?,
            CliCommand::Cancel { id } => run_cancel(&socket, token, id).await?,
            CliCommand::Retry { id, resume } => run_retry(&socket, token, id, resume).await?,
            CliCommand::Remove { id } => run_remove(&socket, token, id).await?,
            CliCommand::Watch { id } => run_watch(&socket, token, id).await?,
            CliCommand::Token { subject, ttl } => run_token(&cfg, &subject, ttl)?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
