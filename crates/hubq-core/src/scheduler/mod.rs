//! Job scheduler.
//!
//! Admits queued jobs in FIFO order up to `max_concurrent_downloads`, runs each
//! one under a supervisor task (executor + progress pump + in-slot retries),
//! and enforces the stop grace period. The store is the source of truth for
//! status; the scheduler only keeps the in-flight task table.

mod run;
mod supervise;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broadcast::ProgressBroadcaster;
use crate::config::{HubqConfig, PartialFilesPolicy};
use crate::job::{DownloadJob, JobId};
use crate::retry::RetryPolicy;
use crate::store::JobStore;
use crate::transfer::{RemoteFetcher, TransferExecutor};

/// Scheduler limits, derived from [`HubqConfig`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_concurrent: usize,
    pub cancel_grace: Duration,
    pub partial_files: PartialFilesPolicy,
    pub retry: RetryPolicy,
    /// Capacity of each executor's progress channel.
    pub progress_buffer: usize,
}

impl From<&HubqConfig> for SchedulerConfig {
    fn from(cfg: &HubqConfig) -> Self {
        Self {
            max_concurrent: cfg.max_concurrent_downloads.max(1),
            cancel_grace: Duration::from_secs(cfg.cancel_grace_secs),
            partial_files: cfg.partial_files_on_cancel,
            retry: RetryPolicy::from(&cfg.retry),
            progress_buffer: 64,
        }
    }
}

#[derive(Debug)]
enum Command {
    /// Something may have entered `queued`; try to fill free slots.
    Kick,
    /// A stop request was recorded for this job.
    Stop(JobId),
    /// Delete partial files of a job cancelled while not running.
    Discard(Box<DownloadJob>),
    /// A supervisor task has exited (sent from its drop guard).
    Released(JobId),
}

/// Cloneable handle for signalling the scheduler loop. Never blocks.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl SchedulerHandle {
    pub fn kick(&self) {
        self.send(Command::Kick);
    }

    /// Fire the job's cancellation token and start its grace timer.
    pub fn stop(&self, id: JobId) {
        self.send(Command::Stop(id));
    }

    /// Apply the partial-files policy to a job cancelled outside an executor.
    pub fn discard(&self, job: DownloadJob) {
        self.send(Command::Discard(Box::new(job)));
    }

    fn send(&self, cmd: Command) {
        if self.tx.send(cmd).is_err() {
            tracing::debug!("scheduler is gone; command dropped");
        }
    }
}

/// Start the scheduler loop. It runs until `shutdown` fires, then stops all
/// executors and waits up to the grace period for them to exit.
pub fn spawn(
    cfg: SchedulerConfig,
    store: Arc<dyn JobStore>,
    broadcaster: Arc<ProgressBroadcaster>,
    fetcher: Arc<dyn RemoteFetcher>,
    shutdown: CancellationToken,
) -> (SchedulerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = SchedulerHandle { tx: tx.clone() };
    let supervisor = Arc::new(supervise::Supervisor {
        store: Arc::clone(&store),
        broadcaster,
        executor: TransferExecutor::new(fetcher),
        retry: cfg.retry,
        partial_files: cfg.partial_files,
        progress_buffer: cfg.progress_buffer.max(1),
    });
    let scheduler = run::Scheduler::new(cfg, store, supervisor, tx, rx, shutdown);
    let task = tokio::spawn(scheduler.run());
    (handle, task)
}
