//! Scheduler loop: admission, stop signalling, grace enforcement, shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::supervise::{SlotGuard, Supervisor};
use super::{Command, SchedulerConfig};
use crate::broadcast::JobEventKind;
use crate::job::{DownloadJob, JobId};
use crate::state::Settlement;
use crate::store::JobStore;

/// An occupied slot. It stays occupied until the task has actually exited.
struct Slot {
    cancel: CancellationToken,
    abort: AbortHandle,
    /// Set when a stop was signalled.
    deadline: Option<Instant>,
    abandoned: bool,
}

pub(super) struct Scheduler {
    cfg: SchedulerConfig,
    store: Arc<dyn JobStore>,
    supervisor: Arc<Supervisor>,
    tx: mpsc::UnboundedSender<Command>,
    rx: mpsc::UnboundedReceiver<Command>,
    shutdown: CancellationToken,
    tasks: JoinSet<()>,
    slots: HashMap<JobId, Slot>,
}

impl Scheduler {
    pub(super) fn new(
        cfg: SchedulerConfig,
        store: Arc<dyn JobStore>,
        supervisor: Arc<Supervisor>,
        tx: mpsc::UnboundedSender<Command>,
        rx: mpsc::UnboundedReceiver<Command>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            cfg,
            store,
            supervisor,
            tx,
            rx,
            shutdown,
            tasks: JoinSet::new(),
            slots: HashMap::new(),
        }
    }

    pub(super) async fn run(mut self) {
        tracing::info!(max_concurrent = self.cfg.max_concurrent, "scheduler started");
        loop {
            self.fill().await;
            let deadline = self.next_deadline();
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd).await,
                    None => break,
                },
                Some(res) = self.tasks.join_next() => {
                    if let Err(e) = res {
                        if e.is_panic() {
                            tracing::error!(error = %e, "supervisor task panicked");
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(far_future)), if deadline.is_some() => {
                    self.expire().await;
                }
            }
        }
        self.drain().await;
    }

    /// Claim queued jobs until every slot is busy or the queue is empty.
    async fn fill(&mut self) {
        while self.slots.len() < self.cfg.max_concurrent {
            // Jobs whose previous task has not exited are not eligible yet.
            let exclude: Vec<JobId> = self.slots.keys().copied().collect();
            match self.store.claim_next_queued(&exclude).await {
                Ok(Some(job)) => self.start(job),
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "failed to claim next queued job");
                    break;
                }
            }
        }
    }

    fn start(&mut self, job: DownloadJob) {
        let id = job.id;
        tracing::info!(
            job_id = id,
            repository = %job.spec.repository_id,
            attempt = job.attempt_count,
            resume_from = job.progress.bytes_downloaded,
            "job admitted"
        );
        self.supervisor
            .broadcaster
            .publish(JobEventKind::Status, job.clone());

        let cancel = self.shutdown.child_token();
        let guard = SlotGuard {
            id,
            tx: self.tx.clone(),
        };
        let abort = self.tasks.spawn(
            Arc::clone(&self.supervisor).supervise(job, cancel.clone(), guard),
        );
        self.slots.insert(
            id,
            Slot {
                cancel,
                abort,
                deadline: None,
                abandoned: false,
            },
        );
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Kick => {}
            Command::Stop(id) => self.stop(id),
            Command::Discard(job) => {
                let supervisor = Arc::clone(&self.supervisor);
                tokio::spawn(async move { supervisor.discard_if_configured(&job).await });
            }
            Command::Released(id) => {
                if self.slots.remove(&id).is_some() {
                    tracing::debug!(job_id = id, "slot released");
                }
            }
        }
    }

    fn stop(&mut self, id: JobId) {
        let Some(slot) = self.slots.get_mut(&id) else {
            tracing::debug!(job_id = id, "stop for a job that is not running");
            return;
        };
        if slot.deadline.is_some() || slot.abandoned {
            return;
        }
        slot.cancel.cancel();
        slot.deadline = Some(Instant::now() + self.cfg.cancel_grace);
        tracing::debug!(job_id = id, "stop signalled");
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.slots
            .values()
            .filter(|s| !s.abandoned)
            .filter_map(|s| s.deadline)
            .min()
    }

    /// Abort executors that ignored a stop past the grace period.
    async fn expire(&mut self) {
        let now = Instant::now();
        let grace_secs = self.cfg.cancel_grace.as_secs();
        let expired: Vec<JobId> = self
            .slots
            .iter()
            .filter(|(_, s)| !s.abandoned && s.deadline.is_some_and(|d| d <= now))
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            tracing::warn!(job_id = id, grace_secs, "executor ignored stop; aborting");
            if let Some(slot) = self.slots.get_mut(&id) {
                slot.abandoned = true;
                slot.abort.abort();
            }
            self.supervisor
                .settle(id, Settlement::Abandoned { grace_secs })
                .await;
        }
    }

    /// Stop every executor, wait up to the grace period, then abort the rest.
    /// Aborted jobs stay `downloading` and are recovered on the next start.
    async fn drain(&mut self) {
        tracing::info!(running = self.slots.len(), "scheduler stopping");
        for slot in self.slots.values() {
            slot.cancel.cancel();
        }
        let tasks = &mut self.tasks;
        let waited = tokio::time::timeout(self.cfg.cancel_grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if waited.is_err() {
            tracing::warn!(
                remaining = self.tasks.len(),
                "executors did not stop in time; aborting"
            );
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }
        self.slots.clear();
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400)
}
