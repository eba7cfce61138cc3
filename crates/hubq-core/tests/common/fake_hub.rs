//! Scripted in-process stand-in for the hub.
//!
//! Each repository id gets a [`Script`]; transfers advance in fixed chunks on a
//! timer, honour cancellation unless told not to, and fail on demand. Every
//! call's resume offset and the peak number of concurrent transfers are
//! recorded for assertions.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use hubq_core::job::JobId;
use hubq_core::transfer::{
    FetchOutcome, FetchRequest, ProgressSink, RemoteFetcher, TransferError,
};

#[derive(Debug, Clone)]
pub struct Script {
    pub total: u64,
    pub chunk: u64,
    pub step: Duration,
    /// The first N calls fail with a transient error.
    pub transient_failures: u32,
    /// The first N calls fail with a permanent error.
    pub permanent_failures: u32,
    /// Keep going after the cancellation token fires.
    pub ignore_cancel: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            total: 1_000,
            chunk: 100,
            step: Duration::from_millis(5),
            transient_failures: 0,
            permanent_failures: 0,
            ignore_cancel: false,
        }
    }
}

impl Script {
    /// Slow enough to observe and act on while it runs.
    pub fn slow() -> Self {
        Self {
            total: 10_000,
            chunk: 100,
            step: Duration::from_millis(20),
            ..Self::default()
        }
    }
}

#[derive(Default)]
pub struct FakeHub {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<HashMap<String, u32>>,
    resumes: Mutex<Vec<(JobId, u64)>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeHub {
    pub fn script(&self, repo: &str, script: Script) {
        self.scripts.lock().unwrap().insert(repo.to_string(), script);
    }

    /// Resume offsets passed to every call for `id`, in call order.
    pub fn resumes(&self, id: JobId) -> Vec<u64> {
        self.resumes
            .lock()
            .unwrap()
            .iter()
            .filter(|(j, _)| *j == id)
            .map(|(_, offset)| *offset)
            .collect()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self) -> ActiveGuard<'_> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ActiveGuard(&self.active)
    }
}

#[async_trait]
impl RemoteFetcher for FakeHub {
    async fn fetch(
        &self,
        request: FetchRequest,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> Result<FetchOutcome, TransferError> {
        let _active = self.enter();
        let repo = request.spec.repository_id.clone();
        self.resumes
            .lock()
            .unwrap()
            .push((request.job_id, request.resume_from));
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&repo)
            .cloned()
            .unwrap_or_default();
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(repo.clone()).or_insert(0);
            *n += 1;
            *n
        };

        if call <= script.permanent_failures {
            return Err(TransferError::Permanent(format!(
                "404 Client Error: repository {repo} not found"
            )));
        }
        if call <= script.transient_failures {
            return Err(TransferError::Transient(format!(
                "connection reset by peer (call {call})"
            )));
        }

        progress.set_total(script.total);
        let mut pos = request.resume_from.min(script.total);
        while pos < script.total {
            if script.ignore_cancel {
                tokio::time::sleep(script.step).await;
            } else {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(FetchOutcome::Interrupted),
                    _ = tokio::time::sleep(script.step) => {}
                }
            }
            pos = (pos + script.chunk).min(script.total);
            progress.observe(pos);
        }
        Ok(FetchOutcome::Finished)
    }
}
