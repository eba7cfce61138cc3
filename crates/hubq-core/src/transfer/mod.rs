//! Transfer execution: one job's fetch through an injected [`RemoteFetcher`].
//!
//! The fetcher is the only thing that talks to the hub. It reports cumulative
//! progress through a [`ProgressSink`] and watches a `CancellationToken`; the
//! executor turns its result into an [`ExecutorOutcome`] for the scheduler.

mod executor;
mod hub_cli;

pub use executor::{ExecutorOutcome, TransferExecutor};
pub use hub_cli::{build_args, HubCliFetcher};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::job::{JobId, JobSpec};

/// Classified transfer failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    /// Network blip, timeout, throttling. Worth retrying.
    #[error("{0}")]
    Transient(String),
    /// Bad repository, remote authorization, disk exhaustion.
    #[error("{0}")]
    Permanent(String),
}

impl TransferError {
    pub fn message(&self) -> &str {
        match self {
            TransferError::Transient(m) | TransferError::Permanent(m) => m,
        }
    }
}

/// Everything a fetcher needs for one run.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub job_id: JobId,
    pub spec: JobSpec,
    /// Bytes already acknowledged for this job; resume from here if possible.
    pub resume_from: u64,
}

/// How a fetch that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// All selected files are in place.
    Finished,
    /// Stopped early because the cancellation token fired.
    Interrupted,
}

/// Live output of the external download tool. Relayed to watchers, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stream", rename_all = "snake_case")]
pub enum ToolOutput {
    Started { command: String },
    Line { text: String },
    /// `code` is absent when the tool was killed.
    Exited { code: Option<i32> },
}

/// Progress report sent from a running executor to the broadcaster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Cumulative bytes for the job (never smaller than a previous report).
    Bytes { downloaded: u64 },
    Total { total: u64 },
    Output(ToolOutput),
}

/// Non-blocking progress reporter handed to a fetcher.
///
/// Counts are cumulative for the job, starting at the resume offset. When the
/// channel is full an update is dropped; a later one supersedes it.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: mpsc::Sender<ProgressEvent>,
    downloaded: Arc<AtomicU64>,
}

impl ProgressSink {
    pub fn new(tx: mpsc::Sender<ProgressEvent>, start: u64) -> Self {
        Self {
            tx,
            downloaded: Arc::new(AtomicU64::new(start)),
        }
    }

    /// Add `delta` freshly received bytes.
    pub fn advance(&self, delta: u64) {
        if delta == 0 {
            return;
        }
        let now = self.downloaded.fetch_add(delta, Ordering::Relaxed) + delta;
        let _ = self.tx.try_send(ProgressEvent::Bytes { downloaded: now });
    }

    /// Report an absolute byte count (e.g. measured on disk). Lower values are ignored.
    pub fn observe(&self, downloaded: u64) {
        let prev = self.downloaded.fetch_max(downloaded, Ordering::Relaxed);
        if downloaded > prev {
            let _ = self.tx.try_send(ProgressEvent::Bytes { downloaded });
        }
    }

    pub fn set_total(&self, total: u64) {
        let _ = self.tx.try_send(ProgressEvent::Total { total });
    }

    /// Relay tool output. Lines are shed once the channel is half full so
    /// byte counts keep their room; start and exit notices are only dropped
    /// when it is full.
    pub fn output(&self, output: ToolOutput) {
        if matches!(output, ToolOutput::Line { .. })
            && self.tx.capacity() * 2 < self.tx.max_capacity()
        {
            return;
        }
        let _ = self.tx.try_send(ProgressEvent::Output(output));
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }
}

/// The hub-facing collaborator. Implementations must return promptly once
/// `cancel` fires and must not keep the sink past the end of `fetch`.
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    async fn fetch(
        &self,
        request: FetchRequest,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> Result<FetchOutcome, TransferError>;

    /// Delete partially fetched files for a cancelled job.
    async fn discard_partial(&self, _spec: &JobSpec) -> Result<(), TransferError> {
        Ok(())
    }
}
