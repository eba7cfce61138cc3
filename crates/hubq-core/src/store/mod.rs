//! Durable job records: the single source of truth for status and progress.
//!
//! All status changes are read-modify-write through [`JobStore::update`],
//! which runs the mutation under the store's write lock so two concurrent
//! transitions on the same job are linearized.

mod query;
pub mod sqlite;


use async_trait::async_trait;

use crate::error::HubqError;
use crate::job::{DownloadJob, JobId, JobSpec};
use crate::state::{MutationCtx, Transition};

pub use query::{JobQuery, SortDirection, SortKey};
pub use sqlite::SqliteJobStore;

/// Read-modify-write step run atomically against one job.
///
/// Returning [`Transition::NoOp`] skips the write; returning an error aborts it.
pub type JobMutation =
    Box<dyn FnOnce(&mut DownloadJob, &MutationCtx) -> Result<Transition, HubqError> + Send>;

/// Box a closure as a [`JobMutation`].
pub fn mutate<F>(f: F) -> JobMutation
where
    F: FnOnce(&mut DownloadJob, &MutationCtx) -> Result<Transition, HubqError> + Send + 'static,
{
    Box::new(f)
}

/// Result of [`JobStore::submit`].
#[derive(Debug, Clone)]
pub struct Submission {
    pub job: DownloadJob,
    /// `false` when an active job with the same fingerprint already existed.
    pub created: bool,
}

/// Result of [`JobStore::update`].
#[derive(Debug, Clone)]
pub struct Updated {
    pub job: DownloadJob,
    pub transition: Transition,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new `queued` job. Conflicts if an active job has the same fingerprint.
    async fn create(&self, spec: JobSpec, fingerprint: String) -> Result<DownloadJob, HubqError>;

    /// Return the active job with this fingerprint, or create one. Atomic.
    async fn submit(&self, spec: JobSpec, fingerprint: String) -> Result<Submission, HubqError>;

    async fn get(&self, id: JobId) -> Result<DownloadJob, HubqError>;

    async fn list(&self, query: &JobQuery) -> Result<Vec<DownloadJob>, HubqError>;

    async fn update(&self, id: JobId, mutation: JobMutation) -> Result<Updated, HubqError>;

    /// Active (`queued|downloading|paused`) job with this fingerprint.
    async fn find_by_fingerprint(&self, fingerprint: &str)
        -> Result<Option<DownloadJob>, HubqError>;

    /// Move the oldest queued job not in `exclude` to `downloading` and return it.
    async fn claim_next_queued(&self, exclude: &[JobId]) -> Result<Option<DownloadJob>, HubqError>;

    /// Resolve jobs left `downloading` by a previous process. Returns how many changed.
    async fn recover_interrupted(&self) -> Result<u64, HubqError>;

    /// Evict a terminal job. Returns the removed record.
    async fn remove(&self, id: JobId) -> Result<DownloadJob, HubqError>;
}
