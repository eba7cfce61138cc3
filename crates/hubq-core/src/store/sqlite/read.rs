//! Job reads: row decoding, get, list, fingerprint lookup.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::{from_db, SqliteJobStore};
use crate::error::HubqError;
use crate::job::{
    DownloadJob, FailureKind, JobError, JobId, JobSpec, JobStatus, Progress, StopRequest,
};
use crate::store::JobQuery;

pub(super) const JOB_COLUMNS: &str = "id, fingerprint, spec_json, status, bytes_downloaded, \
     total_bytes, error_kind, error_message, attempt_count, queue_seq, stop_request, \
     created_at, updated_at, completed_at";

fn corrupt(id: JobId, what: &str, value: &str) -> HubqError {
    HubqError::Internal(format!("job {id}: unknown {what} {value:?} in store"))
}

pub(super) fn job_from_row(row: &SqliteRow) -> Result<DownloadJob, HubqError> {
    let id: i64 = row.try_get("id")?;
    let spec_json: String = row.try_get("spec_json")?;
    let spec: JobSpec = serde_json::from_str(&spec_json)?;

    let status_str: String = row.try_get("status")?;
    let status = JobStatus::parse(&status_str).ok_or_else(|| corrupt(id, "status", &status_str))?;

    let error_kind: Option<String> = row.try_get("error_kind")?;
    let error = match error_kind {
        Some(kind) => {
            let kind_parsed =
                FailureKind::parse(&kind).ok_or_else(|| corrupt(id, "error kind", &kind))?;
            let message: Option<String> = row.try_get("error_message")?;
            Some(JobError::new(kind_parsed, message.unwrap_or_default()))
        }
        None => None,
    };

    let stop: Option<String> = row.try_get("stop_request")?;
    let stop_request = match stop {
        Some(s) => Some(StopRequest::parse(&s).ok_or_else(|| corrupt(id, "stop request", &s))?),
        None => None,
    };

    let total: Option<i64> = row.try_get("total_bytes")?;
    let attempt: i64 = row.try_get("attempt_count")?;

    Ok(DownloadJob {
        id,
        fingerprint: row.try_get("fingerprint")?,
        spec,
        status,
        progress: Progress {
            bytes_downloaded: from_db(row.try_get("bytes_downloaded")?),
            total_bytes: total.map(from_db),
        },
        error,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
        attempt_count: u32::try_from(attempt).unwrap_or(u32::MAX),
        queue_seq: row.try_get("queue_seq")?,
        stop_request,
    })
}

/// Load one job inside an open connection or transaction.
pub(super) async fn load(conn: &mut SqliteConnection, id: JobId) -> Result<DownloadJob, HubqError> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1");
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(HubqError::NotFound(id))?;
    job_from_row(&row)
}

pub(super) async fn load_active_by_fingerprint(
    conn: &mut SqliteConnection,
    fingerprint: &str,
) -> Result<Option<DownloadJob>, HubqError> {
    let sql = format!(
        "SELECT {JOB_COLUMNS} FROM jobs \
         WHERE fingerprint = ?1 AND status IN ('queued', 'downloading', 'paused') \
         LIMIT 1"
    );
    let row = sqlx::query(&sql)
        .bind(fingerprint)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(job_from_row).transpose()
}

impl SqliteJobStore {
    pub(super) async fn fetch_job(&self, id: JobId) -> Result<DownloadJob, HubqError> {
        let mut conn = self.pool.acquire().await?;
        load(&mut *conn, id).await
    }

    pub(super) async fn find_active(
        &self,
        fingerprint: &str,
    ) -> Result<Option<DownloadJob>, HubqError> {
        let mut conn = self.pool.acquire().await?;
        load_active_by_fingerprint(&mut *conn, fingerprint).await
    }

    /// Snapshot of all jobs matching the query. Status filtering happens in SQL,
    /// search and ordering in [`JobQuery::apply`].
    pub(super) async fn list_jobs(&self, query: &JobQuery) -> Result<Vec<DownloadJob>, HubqError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE (?1 IS NULL OR status = ?1)");
        let rows = sqlx::query(&sql)
            .bind(query.status.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(job_from_row(row)?);
        }
        query.apply(&mut out);
        Ok(out)
    }
}
