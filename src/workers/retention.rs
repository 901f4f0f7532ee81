//! Retention worker: periodic sweep that hard-deletes aged tombstones,
//! trims history, and purges terminal jobs (spec §4.9 "Retention").
//!
//! Runs two tasks: a ticker that self-enqueues a retention job on
//! `maintenanceIntervalMs`, and the usual lease-process-complete loop that
//! drains those jobs — so a manually-enqueued retention job (e.g. from an
//! admin endpoint) runs through the same path as the scheduled sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use libsql::params;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::error::AccessorError;
use crate::graph;
use crate::jobs::JobType;
use crate::workers::{run_poll_loop, WorkerContext, WorkerFailure};

pub fn spawn(ctx: Arc<WorkerContext>) -> Vec<JoinHandle<()>> {
    vec![spawn_ticker(ctx.clone()), run_poll_loop("retention", &[JobType::Retention], ctx, |ctx, job| async move { process_one(ctx, job).await })]
}

fn spawn_ticker(ctx: Arc<WorkerContext>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let cfg = ctx.config.current().await;
            tokio::time::sleep(Duration::from_millis(cfg.maintenance_interval_ms)).await;
            if !cfg.enabled {
                continue;
            }
            let enqueued = ctx
                .queue
                .enqueue(JobType::Retention, None, serde_json::json!({}), cfg.worker_max_retries as i64)
                .await;
            if let Err(e) = enqueued {
                tracing::warn!(error = %e, "failed to schedule retention sweep");
            }
        }
    })
}

#[derive(Debug, Default, Serialize)]
struct RetentionSummary {
    #[serde(rename = "tombstonesPurged")]
    tombstones_purged: i64,
    #[serde(rename = "historyPurged")]
    history_purged: i64,
    #[serde(rename = "completedJobsPurged")]
    completed_jobs_purged: i64,
    #[serde(rename = "deadJobsPurged")]
    dead_jobs_purged: i64,
    #[serde(rename = "graphLinksPurged")]
    graph_links_purged: i64,
    #[serde(rename = "entitiesOrphaned")]
    entities_orphaned: i64,
}

async fn process_one(ctx: Arc<WorkerContext>, _job: crate::jobs::Job) -> Result<serde_json::Value, WorkerFailure> {
    let cfg = ctx.config.current().await;
    let now = Utc::now();
    let mut summary = RetentionSummary::default();

    let tombstone_cutoff = now - chrono::Duration::milliseconds(cfg.tombstone_retention_ms as i64);
    let history_cutoff = now - chrono::Duration::milliseconds(cfg.history_retention_ms as i64);

    let tombstone_ids = list_expired_tombstones(&ctx, tombstone_cutoff, cfg.batch_limit)
        .await
        .map_err(|e| WorkerFailure::new("database_error", e.to_string()))?;

    for memory_id in &tombstone_ids {
        let purge = purge_tombstone(&ctx, memory_id, history_cutoff)
            .await
            .map_err(|e| WorkerFailure::new("database_error", e.to_string()))?;
        summary.graph_links_purged += purge.links_purged;
        summary.entities_orphaned += purge.entities_orphaned;
        summary.history_purged += purge.history_purged;
        summary.tombstones_purged += 1;
    }

    summary.history_purged += purge_stale_history(&ctx, history_cutoff, cfg.batch_limit)
        .await
        .map_err(|e| WorkerFailure::new("database_error", e.to_string()))?;

    let completed_cutoff = now - chrono::Duration::milliseconds(cfg.completed_job_retention_ms as i64);
    let dead_cutoff = now - chrono::Duration::milliseconds(cfg.dead_job_retention_ms as i64);
    summary.completed_jobs_purged =
        ctx.queue.purge_completed(completed_cutoff).await.map_err(|e| WorkerFailure::new("database_error", e.to_string()))?;
    summary.dead_jobs_purged =
        ctx.queue.purge_dead(dead_cutoff).await.map_err(|e| WorkerFailure::new("database_error", e.to_string()))?;

    Ok(serde_json::to_value(&summary).unwrap_or(serde_json::json!({})))
}

async fn list_expired_tombstones(
    ctx: &Arc<WorkerContext>,
    cutoff: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<String>, AccessorError> {
    let cutoff = cutoff.to_rfc3339();
    ctx.accessor
        .with_read(move |conn| async move {
            let mut rows = conn
                .query(
                    "SELECT id FROM memories WHERE is_deleted = 1 AND deleted_at <= ?1 LIMIT ?2",
                    params![cutoff, limit],
                )
                .await
                .map_err(AccessorError::from)?;
            let mut ids = Vec::new();
            while let Some(row) = rows.next().await.map_err(AccessorError::from)? {
                ids.push(row.get::<String>(0).map_err(AccessorError::from)?);
            }
            Ok(ids)
        })
        .await
}

struct TombstonePurge {
    links_purged: i64,
    entities_orphaned: i64,
    history_purged: i64,
}

async fn purge_tombstone(
    ctx: &Arc<WorkerContext>,
    memory_id: &str,
    history_cutoff: DateTime<Utc>,
) -> Result<TombstonePurge, AccessorError> {
    let memory_id = memory_id.to_string();
    let history_cutoff = history_cutoff.to_rfc3339();
    ctx.accessor
        .with_write_tx(move |conn| {
            Box::pin(async move {
                let cleanup = graph::unlink_memory(conn, &memory_id).await.map_err(|e| match e {
                    crate::error::GraphError::Database(a) => a,
                })?;

                let history_purged = conn
                    .execute(
                        "DELETE FROM memory_history WHERE memory_id = ?1 AND created_at <= ?2",
                        params![memory_id.clone(), history_cutoff],
                    )
                    .await? as i64;

                conn.execute("DELETE FROM memories WHERE id = ?1", params![memory_id.clone()]).await?;

                Ok::<_, AccessorError>(TombstonePurge {
                    links_purged: cleanup.links_purged,
                    entities_orphaned: cleanup.entities_orphaned,
                    history_purged,
                })
            })
        })
        .await
}

async fn purge_stale_history(ctx: &Arc<WorkerContext>, cutoff: DateTime<Utc>, limit: i64) -> Result<i64, AccessorError> {
    let cutoff = cutoff.to_rfc3339();
    ctx.accessor
        .with_write_tx(move |conn| {
            Box::pin(async move {
                let purged = conn
                    .execute(
                        "DELETE FROM memory_history WHERE id IN (
                            SELECT id FROM memory_history WHERE created_at <= ?1 LIMIT ?2
                        )",
                        params![cutoff, limit],
                    )
                    .await?;
                Ok::<_, AccessorError>(purged as i64)
            })
        })
        .await
}
