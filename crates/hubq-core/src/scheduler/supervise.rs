//! One admitted job: run the executor and pump together, retry transient
//! failures in the slot, then settle the job against any pending stop.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::Command;
use crate::broadcast::{JobEventKind, ProgressBroadcaster};
use crate::config::PartialFilesPolicy;
use crate::job::{DownloadJob, FailureKind, JobError, JobId, JobStatus};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::state::{self, Settlement};
use crate::store::{mutate, JobStore};
use crate::transfer::{ExecutorOutcome, TransferError, TransferExecutor};

/// Shared by every supervisor task.
pub(super) struct Supervisor {
    pub(super) store: Arc<dyn JobStore>,
    pub(super) broadcaster: Arc<ProgressBroadcaster>,
    pub(super) executor: TransferExecutor,
    pub(super) retry: RetryPolicy,
    pub(super) partial_files: PartialFilesPolicy,
    pub(super) progress_buffer: usize,
}

/// Tells the scheduler the slot is free, however the task ends.
pub(super) struct SlotGuard {
    pub(super) id: JobId,
    pub(super) tx: mpsc::UnboundedSender<Command>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Released(self.id));
    }
}

fn failure(error: &TransferError, runs: u32) -> JobError {
    match error {
        TransferError::Permanent(msg) => JobError::new(FailureKind::Permanent, msg.clone()),
        TransferError::Transient(msg) => JobError::new(
            FailureKind::Transient,
            format!("{msg} (gave up after {runs} attempts)"),
        ),
    }
}

impl Supervisor {
    pub(super) async fn supervise(
        self: Arc<Self>,
        job: DownloadJob,
        cancel: CancellationToken,
        _slot: SlotGuard,
    ) {
        let id = job.id;
        let settlement = self.run_with_retries(job, &cancel).await;
        self.settle(id, settlement).await;
    }

    async fn run_with_retries(&self, mut job: DownloadJob, cancel: &CancellationToken) -> Settlement {
        let id = job.id;
        let attempt = job.attempt_count;
        // Consecutive failed runs without byte progress.
        let mut failures = 0u32;
        // Every failed run of this admission.
        let mut runs = 0u32;

        loop {
            let (tx, rx) = mpsc::channel(self.progress_buffer);
            let (outcome, ()) = tokio::join!(
                self.executor.run(&job, tx, cancel.clone()),
                self.broadcaster.pump(id, attempt, rx),
            );

            let (error, made_progress) = match outcome {
                ExecutorOutcome::Completed { downloaded } => {
                    tracing::info!(job_id = id, downloaded, "transfer finished");
                    return Settlement::Completed;
                }
                ExecutorOutcome::Stopped { downloaded } => {
                    tracing::info!(job_id = id, downloaded, "transfer stopped");
                    return Settlement::Stopped;
                }
                ExecutorOutcome::Failed {
                    error,
                    made_progress,
                } => (error, made_progress),
            };

            if made_progress {
                failures = 0;
            }
            failures += 1;
            runs += 1;

            let delay = match self.retry.decide(failures, runs, &error) {
                RetryDecision::NoRetry => {
                    tracing::warn!(job_id = id, runs, error = %error, "transfer failed");
                    return Settlement::Failed(failure(&error, runs));
                }
                RetryDecision::RetryAfter(delay) => delay,
            };
            tracing::warn!(
                job_id = id,
                run = runs,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "transient transfer error, retrying"
            );
            self.note_transient(id, error.message()).await;

            tokio::select! {
                _ = cancel.cancelled() => return Settlement::Stopped,
                _ = tokio::time::sleep(delay) => {}
            }

            job = match self.store.get(id).await {
                Ok(fresh) if fresh.status == JobStatus::Downloading => fresh,
                Ok(_) => return Settlement::Stopped,
                Err(e) => {
                    tracing::error!(job_id = id, error = %e, "could not reload job for retry");
                    return Settlement::Failed(JobError::new(
                        FailureKind::Transient,
                        format!("job store unavailable: {e}"),
                    ));
                }
            };
        }
    }

    async fn note_transient(&self, id: JobId, message: &str) {
        let message = message.to_string();
        match self
            .store
            .update(id, mutate(move |job, _| Ok(state::note_transient(job, &message))))
            .await
        {
            Ok(updated) if updated.transition.changed() => {
                self.broadcaster.publish(JobEventKind::Status, updated.job);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(job_id = id, error = %e, "failed to record transient error"),
        }
    }

    /// Resolve the finished run in the store and publish the new status.
    pub(super) async fn settle(&self, id: JobId, settlement: Settlement) {
        let updated = match self
            .store
            .update(id, mutate(move |job, ctx| Ok(state::settle(job, settlement, ctx))))
            .await
        {
            Ok(updated) => updated,
            Err(e) => {
                tracing::error!(job_id = id, error = %e, "failed to settle job");
                return;
            }
        };
        if !updated.transition.changed() {
            return;
        }
        let job = updated.job;
        tracing::info!(job_id = id, status = job.status.as_str(), "job settled");
        if job.status == JobStatus::Cancelled {
            self.discard_if_configured(&job).await;
        }
        self.broadcaster.publish(JobEventKind::Status, job);
    }

    pub(super) async fn discard_if_configured(&self, job: &DownloadJob) {
        if self.partial_files != PartialFilesPolicy::Remove {
            return;
        }
        if let Err(e) = self.executor.fetcher().discard_partial(&job.spec).await {
            tracing::warn!(job_id = job.id, error = %e, "failed to remove partial files");
        }
    }
}
