//! SQLite-backed job store (sqlx).
//!
//! Handles connection, migrations, and timestamp helpers. Row decoding lives in
//! `read`, transactional writes in `write`.

mod read;
mod write;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

use super::{JobMutation, JobQuery, JobStore, Submission, Updated};
use crate::error::HubqError;
use crate::job::{DownloadJob, JobId, JobSpec};

/// Percent-encode a path for use in a sqlite:// URI so spaces and special chars don't break parsing.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}", out)
}

/// Handle to the SQLite job database.
///
/// The default file lives under the XDG state directory:
/// `~/.local/state/hubq/jobs.db` on Debian.
#[derive(Clone)]
pub struct SqliteJobStore {
    pub(crate) pool: Pool<Sqlite>,
    /// Serializes read-modify-write transactions within the process.
    write_lock: Arc<Mutex<()>>,
}

impl SqliteJobStore {
    /// Open (or create) the default job database and run migrations.
    pub async fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("hubq")?;
        let db_path = xdg_dirs.place_state_file("jobs.db")?;
        Self::open_at(db_path).await
    }

    /// Open (or create) the database at a specific path. Creates parent dirs if needed.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let uri = path_to_sqlite_uri(path) + "?mode=rwc";
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&uri)
            .await?;
        let store = Self::from_pool(pool);
        store.migrate().await?;
        tracing::debug!(path = %path.display(), "job store opened");
        Ok(store)
    }

    /// In-memory database (tests, throwaway runs).
    pub async fn open_memory() -> Result<Self> {
        // Single connection that never idles out: every pooled connection to
        // `sqlite::memory:` is a separate empty database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self::from_pool(pool);
        store.migrate().await?;
        Ok(store)
    }

    fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    async fn migrate(&self) -> Result<()> {
        // - `spec_json` holds the immutable request as JSON.
        // - `queue_seq` orders admission; reassigned whenever a job re-enters the queue.
        // - `stop_request` is a pending pause/requeue/cancel on a downloading job.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                fingerprint TEXT NOT NULL,
                repository_id TEXT NOT NULL,
                spec_json TEXT NOT NULL,
                status TEXT NOT NULL,
                bytes_downloaded INTEGER NOT NULL DEFAULT 0,
                total_bytes INTEGER,
                error_kind TEXT,
                error_message TEXT,
                attempt_count INTEGER NOT NULL DEFAULT 1,
                queue_seq INTEGER NOT NULL,
                stop_request TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                completed_at INTEGER
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        // At most one active job per fingerprint.
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS jobs_active_fingerprint
            ON jobs (fingerprint)
            WHERE status IN ('queued', 'downloading', 'paused');
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS jobs_status_queue_seq
            ON jobs (status, queue_seq);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Current time as Unix milliseconds.
pub(crate) fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Byte counters are u64 in memory, INTEGER (i64) on disk.
fn to_db(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn from_db(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

/// Map a unique-index violation to a conflict; everything else stays a store error.
fn map_unique(e: sqlx::Error) -> HubqError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            HubqError::conflict("an active job with the same request already exists")
        }
        _ => HubqError::Store(e),
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create(&self, spec: JobSpec, fingerprint: String) -> Result<DownloadJob, HubqError> {
        self.create_job(spec, fingerprint).await
    }

    async fn submit(&self, spec: JobSpec, fingerprint: String) -> Result<Submission, HubqError> {
        self.submit_job(spec, fingerprint).await
    }

    async fn get(&self, id: JobId) -> Result<DownloadJob, HubqError> {
        self.fetch_job(id).await
    }

    async fn list(&self, query: &JobQuery) -> Result<Vec<DownloadJob>, HubqError> {
        self.list_jobs(query).await
    }

    async fn update(&self, id: JobId, mutation: JobMutation) -> Result<Updated, HubqError> {
        self.update_job(id, mutation).await
    }

    async fn find_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<DownloadJob>, HubqError> {
        self.find_active(fingerprint).await
    }

    async fn claim_next_queued(&self, exclude: &[JobId]) -> Result<Option<DownloadJob>, HubqError> {
        self.claim_next(exclude).await
    }

    async fn recover_interrupted(&self) -> Result<u64, HubqError> {
        self.recover_downloading().await
    }

    async fn remove(&self, id: JobId) -> Result<DownloadJob, HubqError> {
        self.remove_job(id).await
    }
}
