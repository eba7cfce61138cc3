//! Progress broadcaster: persists executor progress and fans job updates out
//! to subscribers.
//!
//! One lazily created `tokio::sync::broadcast` channel per watched job plus a
//! single whole-set channel. Publishing never blocks; a subscriber that falls
//! behind is resynchronised from the store by its watch handle.

mod pump;
mod rate;
mod watch;

pub use rate::{ProgressStats, RateTracker};
pub use watch::{FleetWatch, JobWatch};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;
use tokio::sync::broadcast;

use crate::error::HubqError;
use crate::job::{DownloadJob, JobId, JobStatus};
use crate::state;
use crate::store::{mutate, JobQuery, JobStore};
use crate::transfer::ToolOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobEventKind {
    /// Full state, sent first on every subscription and after a resync.
    Snapshot,
    Progress,
    Status,
    /// The job was evicted; no further events follow for it.
    Removed,
    /// Live tool output for a running job. Only sent to that job's watchers.
    Output,
}

/// A job record plus derived, never-stored figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: DownloadJob,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_bytes_per_sec: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub kind: JobEventKind,
    pub job: JobView,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<ToolOutput>,
}

impl JobEvent {
    pub fn new(kind: JobEventKind, job: JobView) -> Self {
        Self {
            kind,
            job,
            output: None,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job.job.id
    }
}

pub struct ProgressBroadcaster {
    store: Arc<dyn JobStore>,
    buffer: usize,
    channels: RwLock<HashMap<JobId, broadcast::Sender<JobEvent>>>,
    fleet: broadcast::Sender<JobEvent>,
    rates: Mutex<HashMap<JobId, RateTracker>>,
}

impl ProgressBroadcaster {
    pub fn new(store: Arc<dyn JobStore>, buffer: usize) -> Self {
        let buffer = buffer.max(1);
        let (fleet, _) = broadcast::channel(buffer);
        Self {
            store,
            buffer,
            channels: RwLock::new(HashMap::new()),
            fleet,
            rates: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Attach derived rate and ETA (only meaningful while downloading).
    pub fn view(&self, job: DownloadJob) -> JobView {
        if job.status != JobStatus::Downloading {
            return JobView {
                job,
                rate_bytes_per_sec: None,
                eta_secs: None,
            };
        }
        let rate = self
            .rates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&job.id)
            .and_then(RateTracker::bytes_per_sec);
        let stats = ProgressStats {
            bytes_done: job.progress.bytes_downloaded,
            total_bytes: job.progress.total_bytes,
            bytes_per_sec: rate,
        };
        JobView {
            rate_bytes_per_sec: rate,
            eta_secs: stats.eta_secs(),
            job,
        }
    }

    /// Send an event for `job` to its watchers and the whole-set channel.
    pub fn publish(&self, kind: JobEventKind, job: DownloadJob) {
        let id = job.id;
        if job.status != JobStatus::Downloading {
            self.forget_rate(id);
        }
        let event = JobEvent::new(kind, self.view(job));

        let mut prune = false;
        {
            let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(tx) = channels.get(&id) {
                // Err only means no receivers are left.
                prune = tx.send(event.clone()).is_err();
            }
        }
        if prune || kind == JobEventKind::Removed {
            self.drop_channel(id, kind == JobEventKind::Removed);
        }
        let _ = self.fleet.send(event);
    }

    /// Whether anyone is subscribed to this job alone.
    pub fn has_watchers(&self, id: JobId) -> bool {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .is_some_and(|tx| tx.receiver_count() > 0)
    }

    /// Relay tool output to `job`'s own watchers. Nothing is persisted and
    /// the whole-set channel is not used.
    pub fn publish_output(&self, job: DownloadJob, output: ToolOutput) {
        let id = job.id;
        let event = JobEvent {
            kind: JobEventKind::Output,
            job: self.view(job),
            output: Some(output),
        };
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = channels.get(&id) {
            let _ = tx.send(event);
        }
    }

    /// Persist coalesced progress for one attempt and publish it if anything
    /// moved. Returns the job as stored afterwards.
    pub async fn apply_progress(
        &self,
        job_id: JobId,
        attempt: u32,
        bytes: Option<u64>,
        total: Option<u64>,
    ) -> Result<DownloadJob, HubqError> {
        let updated = self
            .store
            .update(
                job_id,
                mutate(move |job, _| {
                    let b = bytes.unwrap_or(job.progress.bytes_downloaded);
                    Ok(state::record_progress(job, attempt, b, total))
                }),
            )
            .await?;
        if updated.transition.changed() {
            self.sample_rate(&updated.job);
            self.publish(JobEventKind::Progress, updated.job.clone());
        }
        Ok(updated.job)
    }

    /// Subscribe to one job: initial snapshot, then incremental events.
    pub async fn subscribe(self: &Arc<Self>, id: JobId) -> Result<JobWatch, HubqError> {
        // Subscribe before reading so nothing published in between is lost.
        let rx = self.open_channel(id);
        match self.store.get(id).await {
            Ok(job) => {
                let snapshot = JobEvent::new(JobEventKind::Snapshot, self.view(job));
                Ok(JobWatch::new(Arc::clone(self), id, rx, snapshot))
            }
            Err(e) => {
                drop(rx);
                self.drop_channel(id, false);
                Err(e)
            }
        }
    }

    /// Subscribe to every job: a snapshot per existing job, then all events.
    pub async fn subscribe_all(self: &Arc<Self>) -> Result<FleetWatch, HubqError> {
        let rx = self.fleet.subscribe();
        let jobs = self.store.list(&JobQuery::default()).await?;
        let snapshots = jobs
            .into_iter()
            .rev()
            .map(|job| JobEvent::new(JobEventKind::Snapshot, self.view(job)))
            .collect();
        Ok(FleetWatch::new(Arc::clone(self), rx, snapshots))
    }

    /// Number of jobs with a live per-job channel.
    pub fn watched_jobs(&self) -> usize {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn open_channel(&self, id: JobId) -> broadcast::Receiver<JobEvent> {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(id)
            .or_insert_with(|| broadcast::channel(self.buffer).0)
            .subscribe()
    }

    /// Called by a dropping [`JobWatch`] whose receiver is still alive.
    pub(crate) fn release(&self, id: JobId) {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        if channels.get(&id).is_some_and(|tx| tx.receiver_count() <= 1) {
            channels.remove(&id);
        }
    }

    fn drop_channel(&self, id: JobId, force: bool) {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = channels.get(&id) {
            if force || tx.receiver_count() == 0 {
                channels.remove(&id);
            }
        }
    }

    fn sample_rate(&self, job: &DownloadJob) {
        let now = Instant::now();
        let bytes = job.progress.bytes_downloaded;
        self.rates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(job.id)
            .and_modify(|r| r.sample(bytes, now))
            .or_insert_with(|| RateTracker::new(bytes, now));
    }

    fn forget_rate(&self, id: JobId) {
        self.rates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

#[cfg(test)]
mod tests;
