//! Background workers: extraction, embedding, decision, summarisation,
//! document ingestion, retention, and maintenance (spec §4.9).
//!
//! Every worker but Maintenance is a lease-process-complete/fail loop over
//! the durable [`Queue`](crate::jobs::Queue) — the same at-least-once shape
//! as `ConfigHandle::spawn_watcher`'s poll loop, generalised to draining a
//! job type instead of re-reading one file. Maintenance runs on its own
//! timer since it never touches the job queue.

pub mod decide;
pub mod document;
pub mod embed;
pub mod extract;
pub mod maintenance;
pub mod retention;
pub mod summary;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::collaborators::{Embedder, Generator};
use crate::config::ConfigHandle;
use crate::db::Accessor;
use crate::jobs::{Job, JobType, Queue};
use crate::memory::store::MemoryStore;
use crate::recall::RecallEngine;

/// Shared handles every worker needs. Cheap to clone (all fields are `Arc`).
pub struct WorkerContext {
    pub accessor: Arc<Accessor>,
    pub queue: Arc<Queue>,
    pub store: Arc<MemoryStore>,
    pub config: Arc<ConfigHandle>,
    pub recall: Arc<RecallEngine>,
    pub generator: Arc<dyn Generator>,
    pub embedder: Arc<dyn Embedder>,
    /// Stamped into `memories.embedding_model` after a successful embed, so
    /// a later change of embedder is visible on the rows it touches.
    pub embed_model_name: String,
}

/// Why a leased job didn't complete. `retryable` controls whether it's
/// reported to the queue via `fail` (which schedules a backoff retry, or
/// dead-letters past `max_attempts`) or treated as a terminal no-op success
/// (e.g. no collaborator configured — retrying would never help).
pub struct WorkerFailure {
    pub message: String,
    pub code: String,
    pub retryable: bool,
}

impl WorkerFailure {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into(), retryable: true }
    }

    pub fn terminal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into(), retryable: false }
    }
}

/// Spawn every background worker task. Returns the join handles so `main`
/// can hold them for the life of the process (nothing is awaited on them
/// during normal operation).
pub fn spawn_all(ctx: Arc<WorkerContext>) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    handles.push(extract::spawn(ctx.clone()));
    handles.push(embed::spawn(ctx.clone()));
    handles.push(decide::spawn(ctx.clone()));
    handles.push(summary::spawn(ctx.clone()));
    handles.push(document::spawn(ctx.clone()));
    handles.extend(retention::spawn(ctx.clone()));
    handles.push(maintenance::spawn(ctx));
    handles
}

/// Generic lease-process-complete/fail loop (spec §4.9 "Each worker is a
/// loop: poll with configurable interval, lease up to batch size, process
/// each item with a per-item timeout, mark complete/fail, sleep").
pub fn run_poll_loop<P, Fut>(
    name: &'static str,
    job_types: &'static [JobType],
    ctx: Arc<WorkerContext>,
    process: P,
) -> JoinHandle<()>
where
    P: Fn(Arc<WorkerContext>, Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, WorkerFailure>> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let cfg = ctx.config.current().await;
            if !cfg.enabled {
                tokio::time::sleep(Duration::from_millis(cfg.worker_poll_ms)).await;
                continue;
            }

            let lease_seconds = (cfg.lease_timeout_ms / 1000).max(1) as i64;
            let leased = ctx.queue.lease(name, job_types, cfg.batch_limit.min(20).max(1), lease_seconds).await;
            let batch = match leased {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(worker = name, error = %e, "job lease failed");
                    tokio::time::sleep(Duration::from_millis(cfg.worker_poll_ms)).await;
                    continue;
                }
            };

            if batch.is_empty() {
                tokio::time::sleep(Duration::from_millis(cfg.worker_poll_ms)).await;
                continue;
            }

            for job in batch {
                let job_id = job.id.clone();
                let lease_id = job.lease_id.clone().unwrap_or_default();
                match process(ctx.clone(), job).await {
                    Ok(result) => {
                        if let Err(e) = ctx.queue.complete(&job_id, &lease_id, result).await {
                            tracing::warn!(worker = name, job_id = %job_id, error = %e, "failed to mark job complete");
                        }
                    }
                    Err(failure) if !failure.retryable => {
                        tracing::info!(worker = name, job_id = %job_id, reason = %failure.message, "job skipped, no retry");
                        let _ = ctx
                            .queue
                            .complete(&job_id, &lease_id, serde_json::json!({"skipped": failure.code}))
                            .await;
                    }
                    Err(failure) => {
                        tracing::warn!(worker = name, job_id = %job_id, code = %failure.code, error = %failure.message, "job failed");
                        if let Err(e) = ctx.queue.fail(&job_id, &lease_id, &failure.message, &failure.code).await {
                            tracing::warn!(worker = name, job_id = %job_id, error = %e, "failed to mark job failed");
                        }
                    }
                }
            }
        }
    })
}
