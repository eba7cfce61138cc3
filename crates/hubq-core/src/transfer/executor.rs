use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{FetchOutcome, FetchRequest, ProgressEvent, ProgressSink, RemoteFetcher, TransferError};
use crate::job::DownloadJob;

/// Result of one executor run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorOutcome {
    Completed { downloaded: u64 },
    /// Acknowledged a cancellation.
    Stopped { downloaded: u64 },
    Failed {
        error: TransferError,
        /// Whether this run moved the byte counter at all.
        made_progress: bool,
    },
}

/// Runs a job's transfer through the configured fetcher.
#[derive(Clone)]
pub struct TransferExecutor {
    fetcher: Arc<dyn RemoteFetcher>,
}

impl TransferExecutor {
    pub fn new(fetcher: Arc<dyn RemoteFetcher>) -> Self {
        Self { fetcher }
    }

    pub fn fetcher(&self) -> &Arc<dyn RemoteFetcher> {
        &self.fetcher
    }

    /// Fetch `job` from its last acknowledged offset, streaming progress on `tx`.
    ///
    /// The final byte count is always sent (awaiting channel capacity) before
    /// returning, so the receiver sees where the run stopped. `tx` is dropped on
    /// return.
    pub async fn run(
        &self,
        job: &DownloadJob,
        tx: mpsc::Sender<ProgressEvent>,
        cancel: CancellationToken,
    ) -> ExecutorOutcome {
        let start = job.progress.bytes_downloaded;
        let sink = ProgressSink::new(tx.clone(), start);
        let request = FetchRequest {
            job_id: job.id,
            spec: job.spec.clone(),
            resume_from: start,
        };
        tracing::debug!(job_id = job.id, resume_from = start, "transfer starting");

        let result = self.fetcher.fetch(request, sink.clone(), cancel.clone()).await;
        let downloaded = sink.downloaded();
        drop(sink);
        let _ = tx.send(ProgressEvent::Bytes { downloaded }).await;

        match result {
            Ok(FetchOutcome::Finished) => ExecutorOutcome::Completed { downloaded },
            Ok(FetchOutcome::Interrupted) => ExecutorOutcome::Stopped { downloaded },
            // Transient errors raised while tearing down after a stop count as
            // the stop. A permanent one is still a failure.
            Err(TransferError::Transient(e)) if cancel.is_cancelled() => {
                tracing::debug!(job_id = job.id, error = %e, "error after stop request ignored");
                ExecutorOutcome::Stopped { downloaded }
            }
            Err(error) => ExecutorOutcome::Failed {
                error,
                made_progress: downloaded > start,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobSpec, JobStatus, Progress, RepoKind, SelectionMode};
    use async_trait::async_trait;
    use std::path::PathBuf;

    struct Scripted {
        bytes: u64,
        result: Result<FetchOutcome, TransferError>,
        wait_for_cancel: bool,
    }

    #[async_trait]
    impl RemoteFetcher for Scripted {
        async fn fetch(
            &self,
            request: FetchRequest,
            progress: ProgressSink,
            cancel: CancellationToken,
        ) -> Result<FetchOutcome, TransferError> {
            assert_eq!(request.resume_from, 10);
            progress.set_total(1000);
            progress.advance(self.bytes);
            if self.wait_for_cancel {
                cancel.cancelled().await;
            }
            self.result.clone()
        }
    }

    fn job() -> DownloadJob {
        DownloadJob {
            id: 7,
            fingerprint: "fp".into(),
            spec: JobSpec {
                repository_id: "facebook/opt-125m".into(),
                repository_kind: RepoKind::Model,
                revision: None,
                selection: SelectionMode::Full,
                files: Vec::new(),
                destination: PathBuf::from("/tmp/x"),
                transfer_acceleration: false,
            },
            status: JobStatus::Downloading,
            progress: Progress {
                bytes_downloaded: 10,
                total_bytes: None,
            },
            error: None,
            created_at: 0,
            updated_at: 0,
            completed_at: None,
            attempt_count: 1,
            queue_seq: 1,
            stop_request: None,
        }
    }

    async fn run(f: Scripted, cancel: CancellationToken) -> (ExecutorOutcome, Vec<ProgressEvent>) {
        let (tx, mut rx) = mpsc::channel(16);
        let exec = TransferExecutor::new(Arc::new(f));
        let outcome = exec.run(&job(), tx, cancel).await;
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        (outcome, events)
    }

    #[tokio::test]
    async fn completed_run_reports_final_bytes() {
        let (outcome, events) = run(
            Scripted {
                bytes: 90,
                result: Ok(FetchOutcome::Finished),
                wait_for_cancel: false,
            },
            CancellationToken::new(),
        )
        .await;
        assert_eq!(outcome, ExecutorOutcome::Completed { downloaded: 100 });
        assert_eq!(events.last(), Some(&ProgressEvent::Bytes { downloaded: 100 }));
        assert!(events.contains(&ProgressEvent::Total { total: 1000 }));
    }

    #[tokio::test]
    async fn failure_records_whether_progress_was_made() {
        let (outcome, _) = run(
            Scripted {
                bytes: 0,
                result: Err(TransferError::Transient("reset".into())),
                wait_for_cancel: false,
            },
            CancellationToken::new(),
        )
        .await;
        assert_eq!(
            outcome,
            ExecutorOutcome::Failed {
                error: TransferError::Transient("reset".into()),
                made_progress: false
            }
        );
    }

    #[tokio::test]
    async fn error_after_cancel_is_a_stop() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let (outcome, _) = run(
            Scripted {
                bytes: 5,
                result: Err(TransferError::Transient("killed".into())),
                wait_for_cancel: true,
            },
            cancel,
        )
        .await;
        assert_eq!(outcome, ExecutorOutcome::Stopped { downloaded: 15 });
    }

    #[tokio::test]
    async fn permanent_error_after_cancel_still_fails() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (outcome, _) = run(
            Scripted {
                bytes: 5,
                result: Err(TransferError::Permanent("no space left on device".into())),
                wait_for_cancel: true,
            },
            cancel,
        )
        .await;
        assert_eq!(
            outcome,
            ExecutorOutcome::Failed {
                error: TransferError::Permanent("no space left on device".into()),
                made_progress: true
            }
        );
    }
}
