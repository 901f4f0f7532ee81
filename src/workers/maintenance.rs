//! Maintenance worker: periodic read-only diagnostics — job backlog sizes,
//! orphaned entities, vector index availability — recorded as a health
//! report. Never touches the job queue, so it runs on its own timer rather
//! than `run_poll_loop` (spec §4.9 "Maintenance").

use std::sync::Arc;
use std::time::Duration;

use libsql::params;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::error::AccessorError;
use crate::index::vector;
use crate::workers::WorkerContext;

pub fn spawn(ctx: Arc<WorkerContext>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let cfg = ctx.config.current().await;
            tokio::time::sleep(Duration::from_millis(cfg.maintenance_interval_ms)).await;
            if !cfg.enabled {
                continue;
            }
            match run_health_check(&ctx).await {
                Ok(report) => {
                    tracing::info!(
                        pending_jobs = report.pending_jobs,
                        dead_jobs = report.dead_jobs,
                        orphaned_entities = report.orphaned_entities,
                        vector_available = report.vector_available,
                        "maintenance health check"
                    );
                    if let Err(e) = record_health_report(&ctx, &report).await {
                        tracing::warn!(error = %e, "failed to record maintenance health report");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "maintenance health check failed"),
            }
        }
    })
}

#[derive(Debug, Serialize)]
struct HealthReport {
    #[serde(rename = "pendingJobs")]
    pending_jobs: i64,
    #[serde(rename = "deadJobs")]
    dead_jobs: i64,
    #[serde(rename = "orphanedEntities")]
    orphaned_entities: i64,
    #[serde(rename = "vectorAvailable")]
    vector_available: bool,
    #[serde(rename = "checkedAt")]
    checked_at: String,
}

async fn run_health_check(ctx: &Arc<WorkerContext>) -> Result<HealthReport, AccessorError> {
    ctx.accessor
        .with_read(move |conn| async move {
            let pending_jobs = scalar_count(&conn, "SELECT COUNT(*) FROM jobs WHERE status IN ('pending', 'retry_scheduled', 'leased')").await?;
            let dead_jobs = scalar_count(&conn, "SELECT COUNT(*) FROM jobs WHERE status = 'dead'").await?;
            let orphaned_entities = scalar_count(&conn, "SELECT COUNT(*) FROM entities WHERE mention_count <= 0").await?;
            let vector_available = vector::vector_available(&conn).await?;
            Ok(HealthReport {
                pending_jobs,
                dead_jobs,
                orphaned_entities,
                vector_available,
                checked_at: chrono::Utc::now().to_rfc3339(),
            })
        })
        .await
}

async fn scalar_count(conn: &libsql::Connection, sql: &str) -> Result<i64, AccessorError> {
    let mut rows = conn.query(sql, ()).await.map_err(AccessorError::from)?;
    match rows.next().await.map_err(AccessorError::from)? {
        Some(row) => row.get(0).map_err(AccessorError::from),
        None => Ok(0),
    }
}

async fn record_health_report(ctx: &Arc<WorkerContext>, report: &HealthReport) -> Result<(), AccessorError> {
    let value = serde_json::to_string(report).unwrap_or_else(|_| "{}".to_string());
    ctx.accessor
        .with_write_tx(move |conn| {
            Box::pin(async move {
                conn.execute(
                    "INSERT INTO engine_settings (key, value) VALUES ('last_health_report', ?1)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![value],
                )
                .await
                .map_err(AccessorError::from)
                .map(|_| ())
            })
        })
        .await
}
