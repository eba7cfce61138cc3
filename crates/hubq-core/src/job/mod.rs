//! Download job entity: immutable request spec, lifecycle status, progress counters.

mod fingerprint;

pub use fingerprint::fingerprint;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Job identifier (SQLite rowid, strictly increasing, never reused).
pub type JobId = i64;

/// Revision used when a request does not name one.
pub const DEFAULT_REVISION: &str = "main";

/// Kind of hub repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoKind {
    #[default]
    Model,
    Dataset,
    Space,
}

impl RepoKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RepoKind::Model => "model",
            RepoKind::Dataset => "dataset",
            RepoKind::Space => "space",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "model" => Some(RepoKind::Model),
            "dataset" => Some(RepoKind::Dataset),
            "space" => Some(RepoKind::Space),
            _ => None,
        }
    }
}

/// Which part of the repository to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    /// Every file at the default (or given) revision.
    #[default]
    Full,
    /// Every file at a named branch or revision.
    Branch,
    /// Only the listed files.
    Files,
}

impl SelectionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SelectionMode::Full => "full",
            SelectionMode::Branch => "branch",
            SelectionMode::Files => "files",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "full" => Some(SelectionMode::Full),
            "branch" => Some(SelectionMode::Branch),
            "files" | "explicit-files" => Some(SelectionMode::Files),
            _ => None,
        }
    }
}

/// Immutable description of what to fetch. Built and validated by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub repository_id: String,
    pub repository_kind: RepoKind,
    /// Branch, tag or commit. `None` means [`DEFAULT_REVISION`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    pub selection: SelectionMode,
    /// Explicit file list; only non-empty in [`SelectionMode::Files`].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    /// Resolved destination directory.
    pub destination: PathBuf,
    pub transfer_acceleration: bool,
}

impl JobSpec {
    pub fn effective_revision(&self) -> &str {
        self.revision.as_deref().unwrap_or(DEFAULT_REVISION)
    }
}

/// Lifecycle status. Transitions are defined in [`crate::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Downloading => "downloading",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "downloading" => Some(JobStatus::Downloading),
            "paused" => Some(JobStatus::Paused),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// `completed`, `failed` and `cancelled` only leave via retry.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Statuses that hold a fingerprint (no duplicate may coexist).
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Position in the lifecycle, used when sorting listings by status.
    pub fn rank(self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Downloading => 1,
            JobStatus::Paused => 2,
            JobStatus::Completed => 3,
            JobStatus::Failed => 4,
            JobStatus::Cancelled => 5,
        }
    }
}

/// Stop of a downloading job that the executor has not acknowledged yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopRequest {
    /// Settle as `paused`.
    Pause,
    /// Pause followed by resume: settle straight back into the queue.
    Requeue,
    /// Settle as `cancelled`.
    Cancel,
}

impl StopRequest {
    pub fn as_str(self) -> &'static str {
        match self {
            StopRequest::Pause => "pause",
            StopRequest::Requeue => "requeue",
            StopRequest::Cancel => "cancel",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pause" => Some(StopRequest::Pause),
            "requeue" => Some(StopRequest::Requeue),
            "cancel" => Some(StopRequest::Cancel),
            _ => None,
        }
    }
}

/// Machine-checkable failure class recorded on a job. Serialized with the
/// same names as the matching [`HubqError`](crate::HubqError) kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Network/timeout; auto-retried up to the attempt ceiling.
    #[serde(rename = "TransientTransferError", alias = "transient")]
    Transient,
    /// Bad repository, remote authorization, disk exhaustion. Never auto-retried.
    #[serde(rename = "PermanentTransferError", alias = "permanent")]
    Permanent,
    /// Executor did not acknowledge a cancel within the grace period.
    #[serde(rename = "CancelTimeoutError", alias = "cancel_timeout")]
    CancelTimeout,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Transient => "TransientTransferError",
            FailureKind::Permanent => "PermanentTransferError",
            FailureKind::CancelTimeout => "CancelTimeoutError",
        }
    }

    /// Accepts the lowercase names written by earlier versions too.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TransientTransferError" | "transient" => Some(FailureKind::Transient),
            "PermanentTransferError" | "permanent" => Some(FailureKind::Permanent),
            "CancelTimeoutError" | "cancel_timeout" => Some(FailureKind::CancelTimeout),
            _ => None,
        }
    }
}

/// Last failure reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: FailureKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Byte counters. Rate and ETA are derived by the broadcaster, not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Progress {
    pub bytes_downloaded: u64,
    /// Unknown until the transfer collaborator reports it.
    pub total_bytes: Option<u64>,
}

impl Progress {
    /// Fraction complete in [0.0, 1.0], if the total is known.
    pub fn fraction(&self) -> Option<f64> {
        match self.total_bytes {
            Some(0) => Some(1.0),
            Some(total) => Some((self.bytes_downloaded as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

/// Full job record as stored in the job store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadJob {
    pub id: JobId,
    pub fingerprint: String,
    pub spec: JobSpec,
    pub status: JobStatus,
    pub progress: Progress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    /// Unix milliseconds.
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    /// 1 for the first attempt, incremented on every explicit retry.
    pub attempt_count: u32,
    /// Admission order key, reassigned on every entry into `queued`.
    pub queue_seq: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_request: Option<StopRequest>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_string_roundtrip() {
        for s in [
            JobStatus::Queued,
            JobStatus::Downloading,
            JobStatus::Paused,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(JobStatus::parse("running"), None);
    }

    #[test]
    fn terminal_and_active_are_complementary() {
        assert!(JobStatus::Paused.is_active());
        assert!(JobStatus::Downloading.is_active());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
    }

    #[test]
    fn selection_accepts_explicit_files_alias() {
        assert_eq!(SelectionMode::parse("explicit-files"), Some(SelectionMode::Files));
        assert_eq!(SelectionMode::parse("files"), Some(SelectionMode::Files));
    }

    #[test]
    fn progress_fraction() {
        let p = Progress {
            bytes_downloaded: 40,
            total_bytes: Some(100),
        };
        assert_eq!(p.fraction(), Some(0.4));
        assert_eq!(Progress::default().fraction(), None);
    }

    #[test]
    fn failure_kinds_use_the_error_taxonomy() {
        use crate::error::HubqError;
        use crate::transfer::TransferError;

        let err = JobError::new(FailureKind::Transient, "503 (gave up after 3 attempts)");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(
            json["kind"],
            HubqError::from(TransferError::Transient("503".into())).kind()
        );
        assert_eq!(
            FailureKind::Permanent.as_str(),
            HubqError::from(TransferError::Permanent("404".into())).kind()
        );
        assert_eq!(FailureKind::CancelTimeout.as_str(), "CancelTimeoutError");

        for kind in [
            FailureKind::Transient,
            FailureKind::Permanent,
            FailureKind::CancelTimeout,
        ] {
            assert_eq!(FailureKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(FailureKind::parse("cancel_timeout"), Some(FailureKind::CancelTimeout));
        let old: JobError =
            serde_json::from_str(r#"{"kind":"permanent","message":"404"}"#).unwrap();
        assert_eq!(old.kind, FailureKind::Permanent);
    }
}
