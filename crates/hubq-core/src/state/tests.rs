//! Transition table and idempotency checks (pure, no store).

use std::path::PathBuf;

use super::*;
use crate::job::{JobSpec, Progress, RepoKind, SelectionMode};

const CTX: MutationCtx = MutationCtx {
    now: 5_000,
    next_queue_seq: 9,
};

fn job(status: JobStatus) -> DownloadJob {
    DownloadJob {
        id: 1,
        fingerprint: "fp".into(),
        spec: JobSpec {
            repository_id: "facebook/opt-125m".into(),
            repository_kind: RepoKind::Model,
            revision: None,
            selection: SelectionMode::Full,
            files: Vec::new(),
            destination: PathBuf::from("/models/facebook_opt-125m"),
            transfer_acceleration: true,
        },
        status,
        progress: Progress {
            bytes_downloaded: 400,
            total_bytes: Some(1000),
        },
        error: None,
        created_at: 1_000,
        updated_at: 1_000,
        completed_at: None,
        attempt_count: 1,
        queue_seq: 1,
        stop_request: None,
    }
}

fn downloading_with(stop: Option<StopRequest>) -> DownloadJob {
    let mut j = job(JobStatus::Downloading);
    j.stop_request = stop;
    j
}

#[test]
fn pause_downloading_records_stop_request() {
    let mut j = job(JobStatus::Downloading);
    let t = apply(&mut j, Action::Pause, &CTX).unwrap();
    assert_eq!(t, Transition::StopRequested(StopRequest::Pause));
    assert_eq!(j.status, JobStatus::Downloading);
    assert_eq!(j.stop_request, Some(StopRequest::Pause));
}

#[test]
fn pause_twice_is_noop() {
    let mut j = downloading_with(Some(StopRequest::Pause));
    assert_eq!(apply(&mut j, Action::Pause, &CTX).unwrap(), Transition::NoOp);

    let mut p = job(JobStatus::Paused);
    assert_eq!(apply(&mut p, Action::Pause, &CTX).unwrap(), Transition::NoOp);
}

#[test]
fn pause_queued_or_terminal_is_conflict() {
    for s in [JobStatus::Queued, JobStatus::Completed, JobStatus::Failed] {
        let err = apply(&mut job(s), Action::Pause, &CTX).unwrap_err();
        assert_eq!(err.kind(), "ConflictError");
    }
}

#[test]
fn pause_then_resume_before_ack_becomes_requeue() {
    let mut j = job(JobStatus::Downloading);
    apply(&mut j, Action::Pause, &CTX).unwrap();
    let t = apply(&mut j, Action::Resume, &CTX).unwrap();
    assert_eq!(t, Transition::StopRequested(StopRequest::Requeue));

    // Pausing again goes back to a plain pending pause.
    let t = apply(&mut j, Action::Pause, &CTX).unwrap();
    assert_eq!(t, Transition::StopRequested(StopRequest::Pause));
}

#[test]
fn resume_paused_requeues_at_the_back() {
    let mut j = job(JobStatus::Paused);
    let t = apply(&mut j, Action::Resume, &CTX).unwrap();
    assert_eq!(
        t,
        Transition::Applied {
            from: JobStatus::Paused,
            to: JobStatus::Queued
        }
    );
    assert_eq!(j.queue_seq, 9);
    assert_eq!(j.progress.bytes_downloaded, 400);
}

#[test]
fn resume_queued_or_plain_downloading_is_noop() {
    assert_eq!(
        apply(&mut job(JobStatus::Queued), Action::Resume, &CTX).unwrap(),
        Transition::NoOp
    );
    assert_eq!(
        apply(&mut job(JobStatus::Downloading), Action::Resume, &CTX).unwrap(),
        Transition::NoOp
    );
}

#[test]
fn resume_terminal_is_conflict() {
    let err = apply(&mut job(JobStatus::Cancelled), Action::Resume, &CTX).unwrap_err();
    assert!(matches!(err, HubqError::Conflict(_)));
}

#[test]
fn cancel_queued_and_paused_is_immediate() {
    for s in [JobStatus::Queued, JobStatus::Paused] {
        let mut j = job(s);
        let t = apply(&mut j, Action::Cancel, &CTX).unwrap();
        assert_eq!(
            t,
            Transition::Applied {
                from: s,
                to: JobStatus::Cancelled
            }
        );
        assert_eq!(j.completed_at, Some(5_000));
        assert!(j.error.is_none());
    }
}

#[test]
fn cancel_upgrades_pending_pause() {
    let mut j = downloading_with(Some(StopRequest::Pause));
    let t = apply(&mut j, Action::Cancel, &CTX).unwrap();
    assert_eq!(t, Transition::StopRequested(StopRequest::Cancel));
    assert_eq!(apply(&mut j, Action::Cancel, &CTX).unwrap(), Transition::NoOp);
}

#[test]
fn cancel_twice_is_noop() {
    let mut j = job(JobStatus::Queued);
    apply(&mut j, Action::Cancel, &CTX).unwrap();
    assert_eq!(apply(&mut j, Action::Cancel, &CTX).unwrap(), Transition::NoOp);
}

#[test]
fn pause_or_resume_with_pending_cancel_is_conflict() {
    let mut j = downloading_with(Some(StopRequest::Cancel));
    assert!(apply(&mut j, Action::Pause, &CTX).is_err());
    assert!(apply(&mut j, Action::Resume, &CTX).is_err());
}

#[test]
fn cancel_completed_is_conflict() {
    assert!(apply(&mut job(JobStatus::Completed), Action::Cancel, &CTX).is_err());
}

#[test]
fn retry_failed_increments_attempt_and_resets() {
    let mut j = job(JobStatus::Failed);
    j.error = Some(JobError::new(FailureKind::Permanent, "404"));
    j.completed_at = Some(2_000);
    let t = apply(&mut j, Action::Retry { from_scratch: true }, &CTX).unwrap();
    assert!(t.changed());
    assert_eq!(j.status, JobStatus::Queued);
    assert_eq!(j.attempt_count, 2);
    assert!(j.error.is_none());
    assert!(j.completed_at.is_none());
    assert_eq!(j.progress.bytes_downloaded, 0);
    assert_eq!(j.queue_seq, 9);
}

#[test]
fn resuming_retry_keeps_bytes() {
    let mut j = job(JobStatus::Cancelled);
    apply(&mut j, Action::Retry { from_scratch: false }, &CTX).unwrap();
    assert_eq!(j.progress.bytes_downloaded, 400);
    assert_eq!(j.attempt_count, 2);
}

#[test]
fn retry_active_is_noop_and_paused_is_conflict() {
    let retry = Action::Retry { from_scratch: true };
    assert_eq!(
        apply(&mut job(JobStatus::Queued), retry, &CTX).unwrap(),
        Transition::NoOp
    );
    assert_eq!(
        apply(&mut job(JobStatus::Downloading), retry, &CTX).unwrap(),
        Transition::NoOp
    );
    assert!(apply(&mut job(JobStatus::Paused), retry, &CTX).is_err());
}

#[test]
fn admit_only_from_queued() {
    let mut j = job(JobStatus::Queued);
    assert!(admit(&mut j).changed());
    assert_eq!(j.status, JobStatus::Downloading);
    assert_eq!(admit(&mut j), Transition::NoOp);
}

#[test]
fn settle_completed_fills_counters() {
    let mut j = job(JobStatus::Downloading);
    j.error = Some(JobError::new(FailureKind::Transient, "reset"));
    settle(&mut j, Settlement::Completed, &CTX);
    assert_eq!(j.status, JobStatus::Completed);
    assert_eq!(j.progress.bytes_downloaded, 1000);
    assert!(j.error.is_none());
    assert_eq!(j.completed_at, Some(5_000));
}

#[test]
fn settle_applies_pending_stop() {
    let mut p = downloading_with(Some(StopRequest::Pause));
    settle(&mut p, Settlement::Stopped, &CTX);
    assert_eq!(p.status, JobStatus::Paused);
    assert!(p.stop_request.is_none());
    assert_eq!(p.progress.bytes_downloaded, 400);

    let mut r = downloading_with(Some(StopRequest::Requeue));
    settle(&mut r, Settlement::Stopped, &CTX);
    assert_eq!(r.status, JobStatus::Queued);
    assert_eq!(r.queue_seq, 9);

    let mut c = downloading_with(Some(StopRequest::Cancel));
    settle(&mut c, Settlement::Stopped, &CTX);
    assert_eq!(c.status, JobStatus::Cancelled);
    assert!(c.error.is_none());
}

#[test]
fn pending_cancel_wins_over_completion() {
    let mut j = downloading_with(Some(StopRequest::Cancel));
    settle(&mut j, Settlement::Completed, &CTX);
    assert_eq!(j.status, JobStatus::Cancelled);
}

#[test]
fn settle_failed_records_error() {
    let mut j = job(JobStatus::Downloading);
    let err = JobError::new(FailureKind::Permanent, "repository not found");
    settle(&mut j, Settlement::Failed(err.clone()), &CTX);
    assert_eq!(j.status, JobStatus::Failed);
    assert_eq!(j.error, Some(err));
}

#[test]
fn abandoned_cancel_fails_with_cancel_timeout() {
    let mut j = downloading_with(Some(StopRequest::Cancel));
    settle(&mut j, Settlement::Abandoned { grace_secs: 10 }, &CTX);
    assert_eq!(j.status, JobStatus::Failed);
    assert_eq!(j.error.as_ref().map(|e| e.kind), Some(FailureKind::CancelTimeout));
}

#[test]
fn abandoned_pause_or_requeue_ends_paused() {
    for stop in [StopRequest::Pause, StopRequest::Requeue] {
        let mut j = downloading_with(Some(stop));
        settle(&mut j, Settlement::Abandoned { grace_secs: 10 }, &CTX);
        assert_eq!(j.status, JobStatus::Paused);
    }
}

#[test]
fn shutdown_stop_keeps_queue_position() {
    let mut j = job(JobStatus::Downloading);
    settle(&mut j, Settlement::Stopped, &CTX);
    assert_eq!(j.status, JobStatus::Queued);
    assert_eq!(j.queue_seq, 1);
}

#[test]
fn settle_ignores_non_downloading() {
    let mut j = job(JobStatus::Cancelled);
    assert_eq!(settle(&mut j, Settlement::Completed, &CTX), Transition::NoOp);
    assert_eq!(j.status, JobStatus::Cancelled);
}

#[test]
fn progress_is_monotonic_within_attempt() {
    let mut j = job(JobStatus::Downloading);
    assert_eq!(record_progress(&mut j, 1, 500, None), Transition::Updated);
    assert_eq!(record_progress(&mut j, 1, 450, None), Transition::NoOp);
    assert_eq!(j.progress.bytes_downloaded, 500);
    assert_eq!(record_progress(&mut j, 2, 900, None), Transition::NoOp);
    assert_eq!(j.progress.bytes_downloaded, 500);
}

#[test]
fn progress_ignored_when_not_downloading() {
    let mut j = job(JobStatus::Paused);
    assert!(!record_progress(&mut j, 1, 999, Some(1000)).changed());
}

#[test]
fn recover_downloading() {
    let mut j = job(JobStatus::Downloading);
    assert!(recover(&mut j, &CTX).changed());
    assert_eq!(j.status, JobStatus::Queued);

    let mut p = downloading_with(Some(StopRequest::Pause));
    recover(&mut p, &CTX);
    assert_eq!(p.status, JobStatus::Paused);

    let mut c = downloading_with(Some(StopRequest::Cancel));
    recover(&mut c, &CTX);
    assert_eq!(c.status, JobStatus::Cancelled);

    assert!(!recover(&mut job(JobStatus::Queued), &CTX).changed());
}
