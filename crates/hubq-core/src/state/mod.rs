//! Job lifecycle transitions.
//!
//! Every status change goes through one of the functions here, called from
//! inside [`crate::store::JobStore::update`] so the check and the write happen
//! under the same per-id lock. Nothing in this module touches I/O.
//!
//! External actions on a `downloading` job only record a [`StopRequest`]; the
//! status changes once the executor has let go of the job (see [`settle`]).

use crate::error::HubqError;
use crate::job::{DownloadJob, FailureKind, JobError, JobStatus, StopRequest};

#[cfg(test)]
mod tests;

/// Values the store supplies to a mutation.
#[derive(Debug, Clone, Copy)]
pub struct MutationCtx {
    /// Unix millis.
    pub now: i64,
    /// Admission key to use if the job (re-)enters `queued`.
    pub next_queue_seq: i64,
}

/// Caller-initiated control actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Pause,
    Resume,
    Cancel,
    /// `from_scratch: false` keeps the byte counter for a resuming retry.
    Retry { from_scratch: bool },
}

impl Action {
    pub fn name(self) -> &'static str {
        match self {
            Action::Pause => "pause",
            Action::Resume => "resume",
            Action::Cancel => "cancel",
            Action::Retry { .. } => "retry",
        }
    }
}

/// Result of applying an action or settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Already in (or moving toward) the requested state.
    NoOp,
    Applied { from: JobStatus, to: JobStatus },
    /// Fields changed without a status change (progress, transient error).
    Updated,
    /// Job is downloading; the executor must be stopped to finish the transition.
    StopRequested(StopRequest),
}

impl Transition {
    pub fn changed(self) -> bool {
        !matches!(self, Transition::NoOp)
    }
}

/// How an executor run ended, from the scheduler's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// All bytes fetched.
    Completed,
    /// Executor acknowledged a stop.
    Stopped,
    /// Permanent failure, or transient failures exhausted the retry budget.
    Failed(JobError),
    /// Executor ignored the stop for longer than the grace period and was aborted.
    Abandoned { grace_secs: u64 },
}

fn conflict(job: &DownloadJob, action: Action) -> HubqError {
    let detail = match job.stop_request {
        Some(stop) => format!(
            "cannot {} job {} ({} with pending {})",
            action.name(),
            job.id,
            job.status.as_str(),
            stop.as_str()
        ),
        None => format!(
            "cannot {} job {} in state {}",
            action.name(),
            job.id,
            job.status.as_str()
        ),
    };
    HubqError::conflict(detail)
}

fn enter_queue(job: &mut DownloadJob, ctx: &MutationCtx) {
    job.status = JobStatus::Queued;
    job.queue_seq = ctx.next_queue_seq;
    job.stop_request = None;
    job.completed_at = None;
}

fn finish(job: &mut DownloadJob, status: JobStatus, ctx: &MutationCtx) {
    debug_assert!(status.is_terminal());
    job.status = status;
    job.stop_request = None;
    job.completed_at = Some(ctx.now);
    if status == JobStatus::Cancelled {
        job.error = None;
    }
}

fn request_stop(job: &mut DownloadJob, stop: StopRequest) -> Transition {
    job.stop_request = Some(stop);
    Transition::StopRequested(stop)
}

/// Apply a control action. Does not touch `updated_at`; the store does.
pub fn apply(
    job: &mut DownloadJob,
    action: Action,
    ctx: &MutationCtx,
) -> Result<Transition, HubqError> {
    use JobStatus::*;

    let from = job.status;
    let outcome = match (action, from, job.stop_request) {
        (Action::Pause, Paused, _) => Transition::NoOp,
        (Action::Pause, Downloading, Some(StopRequest::Pause)) => Transition::NoOp,
        (Action::Pause, Downloading, None | Some(StopRequest::Requeue)) => {
            request_stop(job, StopRequest::Pause)
        }

        (Action::Resume, Queued, _) => Transition::NoOp,
        (Action::Resume, Downloading, None | Some(StopRequest::Requeue)) => Transition::NoOp,
        (Action::Resume, Downloading, Some(StopRequest::Pause)) => {
            request_stop(job, StopRequest::Requeue)
        }
        (Action::Resume, Paused, _) => {
            enter_queue(job, ctx);
            Transition::Applied { from, to: Queued }
        }

        (Action::Cancel, Cancelled, _) => Transition::NoOp,
        (Action::Cancel, Downloading, Some(StopRequest::Cancel)) => Transition::NoOp,
        (Action::Cancel, Downloading, _) => request_stop(job, StopRequest::Cancel),
        (Action::Cancel, Queued | Paused, _) => {
            finish(job, Cancelled, ctx);
            Transition::Applied { from, to: Cancelled }
        }

        (Action::Retry { .. }, Queued | Downloading, _) => Transition::NoOp,
        (Action::Retry { from_scratch }, Completed | Failed | Cancelled, _) => {
            job.attempt_count = job.attempt_count.saturating_add(1);
            job.error = None;
            if from_scratch {
                job.progress.bytes_downloaded = 0;
            }
            enter_queue(job, ctx);
            Transition::Applied { from, to: Queued }
        }

        _ => return Err(conflict(job, action)),
    };
    Ok(outcome)
}

/// Scheduler admission: `queued -> downloading`.
pub fn admit(job: &mut DownloadJob) -> Transition {
    if job.status != JobStatus::Queued {
        return Transition::NoOp;
    }
    job.status = JobStatus::Downloading;
    job.stop_request = None;
    Transition::Applied {
        from: JobStatus::Queued,
        to: JobStatus::Downloading,
    }
}

/// Resolve a finished executor run against any pending stop request.
///
/// A pending cancel wins over success or failure.
pub fn settle(job: &mut DownloadJob, settlement: Settlement, ctx: &MutationCtx) -> Transition {
    use JobStatus::*;

    if job.status != Downloading {
        return Transition::NoOp;
    }
    let from = job.status;
    let pending = job.stop_request;

    let to = match (settlement, pending) {
        (Settlement::Abandoned { grace_secs }, Some(StopRequest::Cancel)) => {
            job.error = Some(JobError::new(
                FailureKind::CancelTimeout,
                format!("transfer did not stop within {grace_secs}s of cancel"),
            ));
            finish(job, Failed, ctx);
            Failed
        }
        (_, Some(StopRequest::Cancel)) => {
            finish(job, Cancelled, ctx);
            Cancelled
        }
        (Settlement::Completed, _) => {
            let done = job.progress.bytes_downloaded;
            let total = job.progress.total_bytes.map_or(done, |t| t.max(done));
            job.progress.bytes_downloaded = total;
            job.progress.total_bytes = Some(total);
            job.error = None;
            finish(job, Completed, ctx);
            Completed
        }
        (Settlement::Failed(err), _) => {
            job.error = Some(err);
            finish(job, Failed, ctx);
            Failed
        }
        (Settlement::Stopped | Settlement::Abandoned { .. }, Some(StopRequest::Pause)) => {
            job.status = Paused;
            job.stop_request = None;
            Paused
        }
        (Settlement::Stopped, Some(StopRequest::Requeue)) => {
            enter_queue(job, ctx);
            Queued
        }
        (Settlement::Abandoned { .. }, Some(StopRequest::Requeue)) => {
            job.status = Paused;
            job.stop_request = None;
            Paused
        }
        // Shutdown: keep the job's place in the queue.
        (Settlement::Stopped | Settlement::Abandoned { .. }, None) => {
            job.status = Queued;
            Queued
        }
    };
    Transition::Applied { from, to }
}

/// Record cumulative progress for the given attempt.
///
/// Bytes only move forward; reports for another attempt or a job that is no
/// longer downloading are ignored.
pub fn record_progress(
    job: &mut DownloadJob,
    attempt: u32,
    bytes: u64,
    total: Option<u64>,
) -> Transition {
    if job.status != JobStatus::Downloading || job.attempt_count != attempt {
        return Transition::NoOp;
    }
    let mut changed = false;
    if bytes > job.progress.bytes_downloaded {
        job.progress.bytes_downloaded = bytes;
        changed = true;
    }
    if let Some(t) = total {
        if job.progress.total_bytes != Some(t) {
            job.progress.total_bytes = Some(t);
            changed = true;
        }
    }
    if changed {
        Transition::Updated
    } else {
        Transition::NoOp
    }
}

/// Record a transient failure that will be retried in place.
pub fn note_transient(job: &mut DownloadJob, message: &str) -> Transition {
    if job.status != JobStatus::Downloading {
        return Transition::NoOp;
    }
    job.error = Some(JobError::new(FailureKind::Transient, message));
    Transition::Updated
}

/// Startup recovery for a job found `downloading` with no executor behind it.
pub fn recover(job: &mut DownloadJob, ctx: &MutationCtx) -> Transition {
    if job.status != JobStatus::Downloading {
        return Transition::NoOp;
    }
    match job.stop_request {
        Some(StopRequest::Pause) => {
            job.status = JobStatus::Paused;
            job.stop_request = None;
        }
        Some(StopRequest::Cancel) => finish(job, JobStatus::Cancelled, ctx),
        Some(StopRequest::Requeue) | None => {
            job.status = JobStatus::Queued;
            job.stop_request = None;
        }
    }
    Transition::Applied {
        from: JobStatus::Downloading,
        to: job.status,
    }
}
