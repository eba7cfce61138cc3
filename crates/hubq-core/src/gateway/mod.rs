//! Control gateway: the only entry point for callers.
//!
//! Every operation authorizes first (so an unauthorized caller learns nothing
//! about which jobs exist), then validates, then goes through the state
//! machine inside the store's atomic update, and finally tells the scheduler
//! and subscribers what changed.

mod validate;

pub use validate::{build_spec, SubmitRequest};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::auth::{Authorizer, Principal};
use crate::broadcast::{FleetWatch, JobEventKind, JobView, JobWatch, ProgressBroadcaster};
use crate::error::HubqError;
use crate::job::{fingerprint, DownloadJob, JobId, JobStatus};
use crate::scheduler::SchedulerHandle;
use crate::state::{self, Action, Transition};
use crate::store::{mutate, JobQuery, JobStore};

/// Response to a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub job_id: JobId,
    /// `true` when an active job with the same fingerprint was returned.
    pub deduplicated: bool,
    pub job: DownloadJob,
}

pub struct ControlGateway {
    store: Arc<dyn JobStore>,
    scheduler: SchedulerHandle,
    broadcaster: Arc<ProgressBroadcaster>,
    authorizer: Arc<dyn Authorizer>,
    models_dir: PathBuf,
}

impl ControlGateway {
    pub fn new(
        store: Arc<dyn JobStore>,
        scheduler: SchedulerHandle,
        broadcaster: Arc<ProgressBroadcaster>,
        authorizer: Arc<dyn Authorizer>,
        models_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            scheduler,
            broadcaster,
            authorizer,
            models_dir,
        }
    }

    fn authorize(&self, credential: Option<&str>) -> Result<Principal, HubqError> {
        self.authorizer.authorize(credential)
    }

    /// Create a job, or return the active job with the same fingerprint.
    pub async fn submit(
        &self,
        request: SubmitRequest,
        credential: Option<&str>,
    ) -> Result<SubmitReceipt, HubqError> {
        let principal = self.authorize(credential)?;
        let spec = build_spec(request, &self.models_dir)?;
        let fp = fingerprint(&spec);
        let submission = self.store.submit(spec, fp).await?;
        let job = submission.job;

        if submission.created {
            tracing::info!(
                job_id = job.id,
                subject = %principal.subject,
                repository = %job.spec.repository_id,
                "job submitted"
            );
            self.broadcaster.publish(JobEventKind::Status, job.clone());
            self.scheduler.kick();
        } else {
            tracing::debug!(job_id = job.id, "duplicate submission coalesced");
        }
        Ok(SubmitReceipt {
            job_id: job.id,
            deduplicated: !submission.created,
            job,
        })
    }

    pub async fn pause(&self, id: JobId, credential: Option<&str>) -> Result<DownloadJob, HubqError> {
        self.act(id, Action::Pause, credential).await
    }

    pub async fn resume(&self, id: JobId, credential: Option<&str>) -> Result<DownloadJob, HubqError> {
        self.act(id, Action::Resume, credential).await
    }

    pub async fn cancel(&self, id: JobId, credential: Option<&str>) -> Result<DownloadJob, HubqError> {
        self.act(id, Action::Cancel, credential).await
    }

    /// Retry a terminal job from scratch.
    pub async fn retry(&self, id: JobId, credential: Option<&str>) -> Result<DownloadJob, HubqError> {
        self.act(id, Action::Retry { from_scratch: true }, credential)
            .await
    }

    /// Retry a terminal job, resuming from the bytes already on disk.
    pub async fn retry_resuming(
        &self,
        id: JobId,
        credential: Option<&str>,
    ) -> Result<DownloadJob, HubqError> {
        self.act(id, Action::Retry { from_scratch: false }, credential)
            .await
    }

    async fn act(
        &self,
        id: JobId,
        action: Action,
        credential: Option<&str>,
    ) -> Result<DownloadJob, HubqError> {
        self.authorize(credential)?;
        let updated = self
            .store
            .update(id, mutate(move |job, ctx| state::apply(job, action, ctx)))
            .await?;
        let job = updated.job;

        match updated.transition {
            Transition::NoOp => {
                tracing::debug!(job_id = id, action = action.name(), "no-op");
                return Ok(job);
            }
            Transition::StopRequested(stop) => {
                tracing::info!(job_id = id, stop = stop.as_str(), "stop requested");
                self.scheduler.stop(id);
            }
            Transition::Applied { from, to } => {
                tracing::info!(
                    job_id = id,
                    action = action.name(),
                    from = from.as_str(),
                    to = to.as_str(),
                    "job transitioned"
                );
                match to {
                    JobStatus::Queued => self.scheduler.kick(),
                    JobStatus::Cancelled => self.scheduler.discard(job.clone()),
                    _ => {}
                }
            }
            Transition::Updated => {}
        }
        self.broadcaster.publish(JobEventKind::Status, job.clone());
        Ok(job)
    }

    /// Evict a terminal job.
    pub async fn remove(&self, id: JobId, credential: Option<&str>) -> Result<DownloadJob, HubqError> {
        self.authorize(credential)?;
        let job = self.store.remove(id).await?;
        tracing::info!(job_id = id, "job removed");
        self.broadcaster.publish(JobEventKind::Removed, job.clone());
        Ok(job)
    }

    pub async fn get(&self, id: JobId, credential: Option<&str>) -> Result<JobView, HubqError> {
        self.authorize(credential)?;
        let job = self.store.get(id).await?;
        Ok(self.broadcaster.view(job))
    }

    pub async fn list(
        &self,
        query: &JobQuery,
        credential: Option<&str>,
    ) -> Result<Vec<JobView>, HubqError> {
        self.authorize(credential)?;
        let jobs = self.store.list(query).await?;
        Ok(jobs.into_iter().map(|j| self.broadcaster.view(j)).collect())
    }

    /// Stream one job's events, starting with a full snapshot.
    pub async fn watch(&self, id: JobId, credential: Option<&str>) -> Result<JobWatch, HubqError> {
        self.authorize(credential)?;
        self.broadcaster.subscribe(id).await
    }

    /// Stream every job's events, starting with a snapshot of each.
    pub async fn watch_all(&self, credential: Option<&str>) -> Result<FleetWatch, HubqError> {
        self.authorize(credential)?;
        self.broadcaster.subscribe_all().await
    }
}
