//! Subscriber handles. Each one delivers its snapshot first, never lets a
//! job's state go backwards, and resynchronises from the store when its
//! channel lags.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

use super::{JobEvent, JobEventKind, ProgressBroadcaster};
use crate::error::HubqError;
use crate::job::JobId;
use crate::store::JobQuery;

/// What a subscriber last saw for one job.
#[derive(Debug, Clone, Copy)]
struct Cursor {
    attempt: u32,
    bytes: u64,
    updated_at: i64,
}

impl Cursor {
    fn of(event: &JobEvent) -> Self {
        let job = &event.job.job;
        Self {
            attempt: job.attempt_count,
            bytes: job.progress.bytes_downloaded,
            updated_at: job.updated_at,
        }
    }

    /// Bring `event` in line with what was already delivered. `None` drops it.
    ///
    /// Within one attempt the byte count never goes backwards: an older
    /// progress event is dropped, and a status or snapshot that raced with a
    /// newer progress write keeps its status but reports the higher count.
    fn reconcile(&self, mut event: JobEvent) -> Option<JobEvent> {
        if matches!(event.kind, JobEventKind::Removed | JobEventKind::Output) {
            return Some(event);
        }
        let job = &mut event.job.job;
        if job.updated_at < self.updated_at {
            return None;
        }
        if job.attempt_count == self.attempt && job.progress.bytes_downloaded < self.bytes {
            if event.kind == JobEventKind::Progress {
                return None;
            }
            job.progress.bytes_downloaded = self.bytes;
        }
        Some(event)
    }
}

/// Event stream for a single job.
pub struct JobWatch {
    broadcaster: Arc<ProgressBroadcaster>,
    id: JobId,
    rx: broadcast::Receiver<JobEvent>,
    pending: Option<JobEvent>,
    cursor: Option<Cursor>,
    finished: bool,
}

impl JobWatch {
    pub(super) fn new(
        broadcaster: Arc<ProgressBroadcaster>,
        id: JobId,
        rx: broadcast::Receiver<JobEvent>,
        snapshot: JobEvent,
    ) -> Self {
        Self {
            broadcaster,
            id,
            rx,
            pending: Some(snapshot),
            cursor: None,
            finished: false,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.id
    }

    /// Next event, or `None` once the job is removed or the broadcaster is gone.
    pub async fn next(&mut self) -> Option<JobEvent> {
        if let Some(event) = self.pending.take() {
            return Some(self.deliver(event));
        }
        while !self.finished {
            match self.rx.recv().await {
                Ok(event) => {
                    if event.job_id() != self.id {
                        continue;
                    }
                    let event = match self.cursor {
                        Some(c) => match c.reconcile(event) {
                            Some(event) => event,
                            None => continue,
                        },
                        None => event,
                    };
                    return Some(self.deliver(event));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(job_id = self.id, skipped, "watcher lagged, resyncing");
                    match self.broadcaster.store().get(self.id).await {
                        Ok(job) => {
                            let event =
                                JobEvent::new(JobEventKind::Snapshot, self.broadcaster.view(job));
                            return Some(self.deliver(event));
                        }
                        Err(HubqError::NotFound(_)) => self.finished = true,
                        Err(e) => {
                            tracing::warn!(job_id = self.id, error = %e, "resync failed");
                        }
                    }
                }
                Err(RecvError::Closed) => self.finished = true,
            }
        }
        None
    }

    fn deliver(&mut self, event: JobEvent) -> JobEvent {
        match event.kind {
            JobEventKind::Removed => self.finished = true,
            JobEventKind::Output => return event,
            _ => {}
        }
        self.cursor = Some(Cursor::of(&event));
        event
    }
}

impl Drop for JobWatch {
    fn drop(&mut self) {
        self.broadcaster.release(self.id);
    }
}

/// Event stream for every job.
pub struct FleetWatch {
    broadcaster: Arc<ProgressBroadcaster>,
    rx: broadcast::Receiver<JobEvent>,
    pending: VecDeque<JobEvent>,
    cursors: HashMap<JobId, Cursor>,
}

impl FleetWatch {
    pub(super) fn new(
        broadcaster: Arc<ProgressBroadcaster>,
        rx: broadcast::Receiver<JobEvent>,
        snapshots: Vec<JobEvent>,
    ) -> Self {
        Self {
            broadcaster,
            rx,
            pending: snapshots.into(),
            cursors: HashMap::new(),
        }
    }

    /// Next event for any job. After a lag every job is re-sent as a snapshot.
    pub async fn next(&mut self) -> Option<JobEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                if let Some(event) = self.reconcile(event) {
                    return Some(self.deliver(event));
                }
                continue;
            }
            match self.rx.recv().await {
                Ok(event) => {
                    if let Some(event) = self.reconcile(event) {
                        return Some(self.deliver(event));
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "fleet watcher lagged, resyncing");
                    match self.broadcaster.store().list(&JobQuery::default()).await {
                        Ok(jobs) => {
                            self.pending = jobs
                                .into_iter()
                                .rev()
                                .map(|job| {
                                    JobEvent::new(JobEventKind::Snapshot, self.broadcaster.view(job))
                                })
                                .collect();
                        }
                        Err(e) => tracing::warn!(error = %e, "resync failed"),
                    }
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    fn reconcile(&self, event: JobEvent) -> Option<JobEvent> {
        match self.cursors.get(&event.job_id()) {
            Some(c) => c.reconcile(event),
            None => Some(event),
        }
    }

    fn deliver(&mut self, event: JobEvent) -> JobEvent {
        match event.kind {
            JobEventKind::Removed => {
                self.cursors.remove(&event.job_id());
            }
            JobEventKind::Output => {}
            _ => {
                self.cursors.insert(event.job_id(), Cursor::of(&event));
            }
        }
        event
    }
}
