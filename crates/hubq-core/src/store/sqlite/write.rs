//! Job writes: insert, guarded read-modify-write, claim, recovery, removal.
//!
//! Every method takes the store's write lock and runs inside one transaction.

use sqlx::{Row, SqliteConnection};

use super::read::{job_from_row, load, load_active_by_fingerprint, JOB_COLUMNS};
use super::{map_unique, to_db, unix_millis, SqliteJobStore};
use crate::error::HubqError;
use crate::job::{DownloadJob, JobId, JobSpec, JobStatus};
use crate::state::{self, MutationCtx, Transition};
use crate::store::{JobMutation, Submission, Updated};

async fn next_queue_seq(conn: &mut SqliteConnection) -> Result<i64, HubqError> {
    let row = sqlx::query("SELECT COALESCE(MAX(queue_seq), 0) + 1 AS next FROM jobs")
        .fetch_one(&mut *conn)
        .await?;
    Ok(row.try_get("next")?)
}

async fn mutation_ctx(conn: &mut SqliteConnection) -> Result<MutationCtx, HubqError> {
    Ok(MutationCtx {
        now: unix_millis(),
        next_queue_seq: next_queue_seq(conn).await?,
    })
}

async fn insert(
    conn: &mut SqliteConnection,
    spec: &JobSpec,
    fingerprint: &str,
) -> Result<JobId, HubqError> {
    let now = unix_millis();
    let seq = next_queue_seq(conn).await?;
    let spec_json = serde_json::to_string(spec)?;

    let row_id = sqlx::query(
        r#"
        INSERT INTO jobs (
            fingerprint, repository_id, spec_json, status,
            bytes_downloaded, total_bytes, error_kind, error_message,
            attempt_count, queue_seq, stop_request,
            created_at, updated_at, completed_at
        ) VALUES (?1, ?2, ?3, ?4,
                  0, NULL, NULL, NULL,
                  1, ?5, NULL,
                  ?6, ?7, NULL)
        "#,
    )
    .bind(fingerprint)
    .bind(&spec.repository_id)
    .bind(spec_json)
    .bind(JobStatus::Queued.as_str())
    .bind(seq)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(map_unique)?
    .last_insert_rowid();

    Ok(row_id)
}

/// Persist every mutable column of `job`. `updated_at` is stamped here.
async fn store_row(conn: &mut SqliteConnection, job: &mut DownloadJob) -> Result<(), HubqError> {
    job.updated_at = unix_millis().max(job.updated_at);
    sqlx::query(
        r#"
        UPDATE jobs
        SET status = ?1,
            bytes_downloaded = ?2,
            total_bytes = ?3,
            error_kind = ?4,
            error_message = ?5,
            attempt_count = ?6,
            queue_seq = ?7,
            stop_request = ?8,
            updated_at = ?9,
            completed_at = ?10
        WHERE id = ?11
        "#,
    )
    .bind(job.status.as_str())
    .bind(to_db(job.progress.bytes_downloaded))
    .bind(job.progress.total_bytes.map(to_db))
    .bind(job.error.as_ref().map(|e| e.kind.as_str()))
    .bind(job.error.as_ref().map(|e| e.message.as_str()))
    .bind(i64::from(job.attempt_count))
    .bind(job.queue_seq)
    .bind(job.stop_request.map(|s| s.as_str()))
    .bind(job.updated_at)
    .bind(job.completed_at)
    .bind(job.id)
    .execute(&mut *conn)
    .await
    .map_err(map_unique)?;
    Ok(())
}

impl SqliteJobStore {
    pub(super) async fn create_job(
        &self,
        spec: JobSpec,
        fingerprint: String,
    ) -> Result<DownloadJob, HubqError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let id = insert(&mut *tx, &spec, &fingerprint).await?;
        let job = load(&mut *tx, id).await?;
        tx.commit().await?;
        tracing::debug!(job_id = id, repo = %spec.repository_id, "job created");
        Ok(job)
    }

    pub(super) async fn submit_job(
        &self,
        spec: JobSpec,
        fingerprint: String,
    ) -> Result<Submission, HubqError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        if let Some(existing) = load_active_by_fingerprint(&mut *tx, &fingerprint).await? {
            tx.commit().await?;
            return Ok(Submission {
                job: existing,
                created: false,
            });
        }
        let id = insert(&mut *tx, &spec, &fingerprint).await?;
        let job = load(&mut *tx, id).await?;
        tx.commit().await?;
        tracing::debug!(job_id = id, repo = %spec.repository_id, "job submitted");
        Ok(Submission { job, created: true })
    }

    pub(super) async fn update_job(
        &self,
        id: JobId,
        mutation: JobMutation,
    ) -> Result<Updated, HubqError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let mut job = load(&mut *tx, id).await?;
        let ctx = mutation_ctx(&mut *tx).await?;

        // An error here drops `tx`, rolling back.
        let transition = mutation(&mut job, &ctx)?;
        if transition.changed() {
            store_row(&mut *tx, &mut job).await?;
        }
        tx.commit().await?;
        Ok(Updated { job, transition })
    }

    /// Claim the next queued job by `queue_seq`, skipping ids in `exclude`
    /// (jobs whose previous executor is still winding down).
    pub(super) async fn claim_next(
        &self,
        exclude: &[JobId],
    ) -> Result<Option<DownloadJob>, HubqError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'queued' \
             ORDER BY queue_seq ASC, id ASC LIMIT ?1"
        );
        let rows = sqlx::query(&sql)
            .bind(exclude.len() as i64 + 1)
            .fetch_all(&mut *tx)
            .await?;

        let mut claimed = None;
        for row in &rows {
            let mut job = job_from_row(row)?;
            if exclude.contains(&job.id) {
                continue;
            }
            if state::admit(&mut job).changed() {
                store_row(&mut *tx, &mut job).await?;
                claimed = Some(job);
            }
            break;
        }
        tx.commit().await?;
        Ok(claimed)
    }

    /// Normalize jobs left in `downloading` (e.g. after a crash) before scheduling.
    pub(super) async fn recover_downloading(&self) -> Result<u64, HubqError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'downloading'");
        let rows = sqlx::query(&sql).fetch_all(&mut *tx).await?;
        let ctx = mutation_ctx(&mut *tx).await?;

        let mut n = 0;
        for row in &rows {
            let mut job = job_from_row(row)?;
            if let Transition::Applied { to, .. } = state::recover(&mut job, &ctx) {
                store_row(&mut *tx, &mut job).await?;
                tracing::info!(job_id = job.id, status = to.as_str(), "recovered interrupted job");
                n += 1;
            }
        }
        tx.commit().await?;
        Ok(n)
    }

    pub(super) async fn remove_job(&self, id: JobId) -> Result<DownloadJob, HubqError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let job = load(&mut *tx, id).await?;
        if job.status.is_active() {
            return Err(HubqError::conflict(format!(
                "job {id} is {}; cancel it before removing",
                job.status.as_str()
            )));
        }
        sqlx::query("DELETE FROM jobs WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(job)
    }
}
