//! Durable at-least-once job queue with lease recovery (spec §4.8).
//!
//! The `jobs` table is the only cross-worker coordination point. All state
//! transitions go through the single-writer accessor, so "exactly one
//! worker holds a lease" falls out of SQLite's single-writer discipline
//! rather than needing its own locking.

use chrono::{DateTime, Duration, Utc};
use libsql::{Connection, params};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::Accessor;
use crate::error::JobError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Extract,
    Embed,
    Decide,
    Summary,
    Document,
    Retention,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Extract => "extract",
            JobType::Embed => "embed",
            JobType::Decide => "decide",
            JobType::Summary => "summary",
            JobType::Document => "document",
            JobType::Retention => "retention",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "extract" => JobType::Extract,
            "embed" => JobType::Embed,
            "decide" => JobType::Decide,
            "summary" => JobType::Summary,
            "document" => JobType::Document,
            "retention" => JobType::Retention,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Leased,
    RetryScheduled,
    Completed,
    Dead,
}

impl JobStatus {
    fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Leased => "leased",
            JobStatus::RetryScheduled => "retry_scheduled",
            JobStatus::Completed => "completed",
            JobStatus::Dead => "dead",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub memory_id: Option<String>,
    pub job_type: JobType,
    pub status: JobStatus,
    pub payload: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub attempts: i64,
    pub max_attempts: i64,
    pub lease_id: Option<String>,
    pub leased_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

const BACKOFF_BASE_SECS: i64 = 5;
const BACKOFF_CAP_SECS: i64 = 300;

/// Durable job queue, backed by a dedicated single-writer table.
pub struct Queue {
    accessor: Arc<Accessor>,
}

impl Queue {
    pub fn new(accessor: Arc<Accessor>) -> Self {
        Self { accessor }
    }

    /// Enqueue a new job. Called from within the Memory Store's own write
    /// transaction in the common case, but also usable standalone.
    pub async fn enqueue(
        &self,
        job_type: JobType,
        memory_id: Option<String>,
        payload: serde_json::Value,
        max_attempts: i64,
    ) -> Result<String, JobError> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now().to_rfc3339();
        let payload_text = payload.to_string();
        self.accessor
            .with_write_tx(move |conn| {
                Box::pin(async move {
                    enqueue_on(conn, &id, job_type, memory_id.as_deref(), &payload_text, max_attempts, &created_at)
                        .await
                        .map(|_| id)
                })
            })
            .await
            .map_err(JobError::Database)
    }

    /// Lease up to `limit` jobs of the given types, oldest-created first.
    pub async fn lease(
        &self,
        worker_id: &str,
        types: &[JobType],
        limit: i64,
        lease_seconds: i64,
    ) -> Result<Vec<Job>, JobError> {
        let _ = worker_id;
        let type_strs: Vec<&'static str> = types.iter().map(|t| t.as_str()).collect();
        self.accessor
            .with_write_tx(move |conn| Box::pin(lease_on(conn, type_strs, limit, lease_seconds)))
            .await
            .map_err(JobError::Database)
    }

    /// Mark a leased job complete.
    pub async fn complete(&self, job_id: &str, lease_id: &str, result: serde_json::Value) -> Result<(), JobError> {
        let job_id = job_id.to_string();
        let lease_id = lease_id.to_string();
        let job_id_for_err = job_id.clone();
        let completed_at = Utc::now().to_rfc3339();
        let result_text = result.to_string();
        let updated = self
            .accessor
            .with_write_tx(move |conn| {
                Box::pin(async move {
                    let rows = conn
                        .execute(
                            "UPDATE jobs SET status = 'completed', result = ?1, completed_at = ?2, lease_id = NULL
                             WHERE id = ?3 AND lease_id = ?4",
                            params![result_text, completed_at, job_id, lease_id],
                        )
                        .await?;
                    Ok::<_, crate::error::AccessorError>(rows)
                })
            })
            .await
            .map_err(JobError::Database)?;
        if updated == 0 {
            return Err(JobError::LeaseMismatch { id: job_id_for_err });
        }
        Ok(())
    }

    /// Mark a leased job failed. Transitions to `dead` once `attempts` has
    /// reached `max_attempts`, else schedules a retry with exponential
    /// backoff and jitter (spec §4.8).
    pub async fn fail(&self, job_id: &str, lease_id: &str, error: &str, error_code: &str) -> Result<JobStatus, JobError> {
        let job_id_s = job_id.to_string();
        let lease_id_s = lease_id.to_string();
        let error = error.to_string();
        let error_code = error_code.to_string();
        self.accessor
            .with_write_tx(move |conn| Box::pin(fail_on(conn, job_id_s, lease_id_s, error, error_code)))
            .await
            .map_err(JobError::Database)
    }

    /// Reclaim leases that have outlived their visibility timeout, flipping
    /// them back to `retry_scheduled` for immediate re-lease.
    pub async fn reclaim_expired_leases(&self, now: DateTime<Utc>, lease_seconds: i64) -> Result<i64, JobError> {
        let cutoff = (now - Duration::seconds(lease_seconds)).to_rfc3339();
        let now_text = now.to_rfc3339();
        self.accessor
            .with_write_tx(move |conn| {
                Box::pin(async move {
                    let rows = conn
                        .execute(
                            "UPDATE jobs SET status = 'retry_scheduled', next_attempt_at = ?1, lease_id = NULL
                             WHERE status = 'leased' AND leased_at <= ?2",
                            params![now_text, cutoff],
                        )
                        .await?;
                    Ok::<_, crate::error::AccessorError>(rows as i64)
                })
            })
            .await
            .map_err(JobError::Database)
    }

    /// Fetch a single job by id, for the job-status endpoint.
    pub async fn get(&self, job_id: &str) -> Result<Job, JobError> {
        let job_id_owned = job_id.to_string();
        let job_id_for_err = job_id.to_string();
        let found = self
            .accessor
            .with_read(move |conn| async move {
                let mut rows = conn
                    .query(
                        "SELECT id, memory_id, job_type, status, payload, result, attempts, max_attempts,
                                lease_id, leased_at, next_attempt_at, created_at
                         FROM jobs WHERE id = ?1",
                        params![job_id_owned],
                    )
                    .await?;
                match rows.next().await? {
                    Some(row) => Ok(Some(row_to_job(&row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(JobError::Database)?;
        found.ok_or(JobError::NotFound { id: job_id_for_err })
    }

    /// Purge `completed` jobs older than the retention window. Reported
    /// separately from dead-job purges so the retention summary can break
    /// them out (spec §4.9).
    pub async fn purge_completed(&self, cutoff: DateTime<Utc>) -> Result<i64, JobError> {
        let cutoff = cutoff.to_rfc3339();
        self.accessor
            .with_write_tx(move |conn| {
                Box::pin(async move {
                    let rows = conn
                        .execute(
                            "DELETE FROM jobs WHERE status = 'completed' AND completed_at <= ?1",
                            params![cutoff],
                        )
                        .await?;
                    Ok::<_, crate::error::AccessorError>(rows as i64)
                })
            })
            .await
            .map_err(JobError::Database)
    }

    /// Purge `dead` jobs older than the retention window.
    pub async fn purge_dead(&self, cutoff: DateTime<Utc>) -> Result<i64, JobError> {
        let cutoff = cutoff.to_rfc3339();
        self.accessor
            .with_write_tx(move |conn| {
                Box::pin(async move {
                    let rows = conn
                        .execute(
                            "DELETE FROM jobs WHERE status = 'dead' AND failed_at <= ?1",
                            params![cutoff],
                        )
                        .await?;
                    Ok::<_, crate::error::AccessorError>(rows as i64)
                })
            })
            .await
            .map_err(JobError::Database)
    }
}

async fn enqueue_on(
    conn: &Connection,
    id: &str,
    job_type: JobType,
    memory_id: Option<&str>,
    payload_text: &str,
    max_attempts: i64,
    created_at: &str,
) -> Result<(), crate::error::AccessorError> {
    conn.execute(
        "INSERT INTO jobs (id, memory_id, job_type, status, payload, attempts, max_attempts, created_at)
         VALUES (?1, ?2, ?3, 'pending', ?4, 0, ?5, ?6)",
        params![id, memory_id, job_type.as_str(), payload_text, max_attempts, created_at],
    )
    .await?;
    Ok(())
}

async fn lease_on(
    conn: &Connection,
    type_strs: Vec<&'static str>,
    limit: i64,
    lease_seconds: i64,
) -> Result<Vec<Job>, crate::error::AccessorError> {
    let now = Utc::now();
    let now_text = now.to_rfc3339();
    let placeholders = type_strs.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!(
        "SELECT id, memory_id, job_type, status, payload, result, attempts, max_attempts,
                lease_id, leased_at, next_attempt_at, created_at
         FROM jobs
         WHERE status IN ('pending', 'retry_scheduled')
           AND (next_attempt_at IS NULL OR next_attempt_at <= ?1)
           AND job_type IN ({placeholders})
         ORDER BY created_at
         LIMIT {limit}"
    );
    let mut params_vec: Vec<libsql::Value> = vec![libsql::Value::Text(now_text.clone())];
    params_vec.extend(type_strs.iter().map(|t| libsql::Value::Text((*t).to_string())));

    let mut rows = conn.query(&sql, params_vec).await?;
    let mut candidates = Vec::new();
    while let Some(row) = rows.next().await? {
        candidates.push(row_to_job(&row)?);
    }

    let lease_id = Uuid::new_v4().to_string();
    let mut leased = Vec::with_capacity(candidates.len());
    for mut job in candidates {
        conn.execute(
            "UPDATE jobs SET status = 'leased', lease_id = ?1, leased_at = ?2, attempts = attempts + 1
             WHERE id = ?3",
            params![lease_id.clone(), now_text.clone(), job.id.clone()],
        )
        .await?;
        job.status = JobStatus::Leased;
        job.lease_id = Some(lease_id.clone());
        job.leased_at = Some(now);
        job.attempts += 1;
        leased.push(job);
    }
    let _ = lease_seconds;
    Ok(leased)
}

async fn fail_on(
    conn: &Connection,
    job_id: String,
    lease_id: String,
    error: String,
    error_code: String,
) -> Result<JobStatus, crate::error::AccessorError> {
    let mut rows = conn
        .query(
            "SELECT attempts, max_attempts FROM jobs WHERE id = ?1 AND lease_id = ?2",
            params![job_id.clone(), lease_id.clone()],
        )
        .await?;
    let Some(row) = rows.next().await? else {
        return Ok(JobStatus::Dead);
    };
    let attempts: i64 = row.get(0)?;
    let max_attempts: i64 = row.get(1)?;

    if attempts >= max_attempts {
        conn.execute(
            "UPDATE jobs SET status = 'dead', failed_at = ?1, last_error = ?2, last_error_code = ?3, lease_id = NULL
             WHERE id = ?4 AND lease_id = ?5",
            params![Utc::now().to_rfc3339(), error, error_code, job_id, lease_id],
        )
        .await?;
        Ok(JobStatus::Dead)
    } else {
        let backoff_secs = (BACKOFF_BASE_SECS * 2i64.pow((attempts - 1).max(0) as u32)).min(BACKOFF_CAP_SECS);
        let jitter = rand::thread_rng().gen_range(0..=backoff_secs.max(1) / 4 + 1);
        let next_attempt_at = (Utc::now() + Duration::seconds(backoff_secs + jitter)).to_rfc3339();
        conn.execute(
            "UPDATE jobs SET status = 'retry_scheduled', next_attempt_at = ?1, last_error = ?2, last_error_code = ?3, lease_id = NULL
             WHERE id = ?4 AND lease_id = ?5",
            params![next_attempt_at, error, error_code, job_id, lease_id],
        )
        .await?;
        Ok(JobStatus::RetryScheduled)
    }
}

fn row_to_job(row: &libsql::Row) -> Result<Job, libsql::Error> {
    let job_type_str: String = row.get(2)?;
    let status_str: String = row.get(3)?;
    let payload_str: String = row.get(4)?;
    let result_str: Option<String> = row.get(5)?;
    let leased_at: Option<String> = row.get(9)?;
    let next_attempt_at: Option<String> = row.get(10)?;
    let created_at: String = row.get(11)?;

    Ok(Job {
        id: row.get(0)?,
        memory_id: row.get(1)?,
        job_type: JobType::parse(&job_type_str).unwrap_or(JobType::Extract),
        status: parse_status(&status_str),
        payload: serde_json::from_str(&payload_str).unwrap_or(serde_json::Value::Null),
        result: result_str.and_then(|s| serde_json::from_str(&s).ok()),
        attempts: row.get(6)?,
        max_attempts: row.get(7)?,
        lease_id: row.get(8)?,
        leased_at: leased_at.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)),
        next_attempt_at: next_attempt_at.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn parse_status(s: &str) -> JobStatus {
    match s {
        "pending" => JobStatus::Pending,
        "leased" => JobStatus::Leased,
        "retry_scheduled" => JobStatus::RetryScheduled,
        "completed" => JobStatus::Completed,
        "dead" => JobStatus::Dead,
        _ => JobStatus::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn setup() -> (Arc<Accessor>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signet.db");
        let accessor = db::open(&path, 2).await.unwrap();
        (Arc::new(accessor), dir)
    }

    #[tokio::test]
    async fn enqueue_then_lease_transitions_to_leased() {
        let (accessor, _dir) = setup().await;
        let queue = Queue::new(accessor);
        let id = queue.enqueue(JobType::Embed, None, serde_json::json!({}), 3).await.unwrap();

        let leased = queue.lease("w1", &[JobType::Embed], 10, 60).await.unwrap();
        assert_eq!(leased.len(), 1);
        assert_eq!(leased[0].id, id);
        assert_eq!(leased[0].status, JobStatus::Leased);
        assert_eq!(leased[0].attempts, 1);
    }

    #[tokio::test]
    async fn fail_under_max_attempts_schedules_retry() {
        let (accessor, _dir) = setup().await;
        let queue = Queue::new(accessor);
        queue.enqueue(JobType::Embed, None, serde_json::json!({}), 3).await.unwrap();
        let leased = queue.lease("w1", &[JobType::Embed], 10, 60).await.unwrap();
        let lease_id = leased[0].lease_id.clone().unwrap();

        let status = queue.fail(&leased[0].id, &lease_id, "boom", "embedder_timeout").await.unwrap();
        assert_eq!(status, JobStatus::RetryScheduled);
    }

    #[tokio::test]
    async fn fail_at_max_attempts_goes_dead() {
        let (accessor, _dir) = setup().await;
        let queue = Queue::new(accessor);
        queue.enqueue(JobType::Embed, None, serde_json::json!({}), 1).await.unwrap();
        let leased = queue.lease("w1", &[JobType::Embed], 10, 60).await.unwrap();
        let lease_id = leased[0].lease_id.clone().unwrap();

        let status = queue.fail(&leased[0].id, &lease_id, "boom", "embedder_timeout").await.unwrap();
        assert_eq!(status, JobStatus::Dead);
    }
}
