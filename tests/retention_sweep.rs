//! Retention sweep hard-deletes tombstones past the retention window,
//! cascades into orphaned entities and stale history, and leaves live data
//! untouched.

mod common;

use std::sync::Arc;
use std::time::Duration;

use libsql::params;
use signet::collaborators::{Generator, NullEmbedder, NullGenerator};
use signet::graph;
use signet::jobs::{JobStatus, JobType, Queue};
use signet::memory::model::RememberOptions;
use signet::recall::RecallEngine;
use signet::workers::{self, WorkerContext};

async fn wait_for_completion(queue: &Queue, job_id: &str) -> signet::jobs::Job {
    for _ in 0..200 {
        let job = queue.get(job_id).await.unwrap();
        if matches!(job.status, JobStatus::Completed | JobStatus::Dead) {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("retention job {job_id} never reached a terminal state");
}

#[tokio::test]
async fn sweep_purges_aged_tombstone_and_its_orphaned_entity() {
    let (accessor, dir) = common::accessor().await;
    // worker_poll_ms low so the retention worker picks the job up quickly;
    // history_retention_ms = 0 so every existing history row is already
    // past the cutoff once the sweep runs.
    let cfg = common::config(&dir, "shadow_mode = true\nworker_poll_ms = 20\nhistory_retention_ms = 0\n");
    let queue = Arc::new(Queue::new(accessor.clone()));
    let store = common::store(accessor.clone(), queue.clone(), cfg.clone());
    let recall = Arc::new(RecallEngine::new(accessor.clone(), Arc::new(NullEmbedder)));

    let created = store.remember("Acme renewed their contract", RememberOptions::default(), common::ctx()).await.unwrap();
    store.forget(&created.id, Some("superseded".into()), false, None, common::ctx()).await.unwrap();

    let memory_id = created.id.clone();
    let entity_id = accessor
        .with_write_tx::<_, signet::error::AccessorError, _>(move |conn| {
            Box::pin(async move {
                let entity_id = graph::upsert_entity(conn, "Acme", "org").await.map_err(|e| match e {
                    signet::error::GraphError::Database(a) => a,
                })?;
                graph::link_mention(conn, &memory_id, &entity_id, "Acme", 1.0).await.map_err(|e| match e {
                    signet::error::GraphError::Database(a) => a,
                })?;
                Ok(entity_id)
            })
        })
        .await
        .unwrap();

    // Backdate the tombstone past the 30-day default window; everything
    // else about this row stays exactly as `forget` left it.
    let stale_deleted_at = (chrono::Utc::now() - chrono::Duration::days(31)).to_rfc3339();
    let memory_id = created.id.clone();
    accessor
        .with_write_tx::<_, signet::error::AccessorError, _>(move |conn| {
            Box::pin(async move {
                conn.execute("UPDATE memories SET deleted_at = ?1 WHERE id = ?2", params![stale_deleted_at, memory_id])
                    .await?;
                Ok(())
            })
        })
        .await
        .unwrap();

    let total_before = count_memories(&accessor).await;

    let generator: Arc<dyn Generator> = Arc::new(NullGenerator);
    let worker_ctx = Arc::new(WorkerContext {
        accessor: accessor.clone(),
        queue: queue.clone(),
        store: store.clone(),
        config: cfg.clone(),
        recall,
        generator,
        embedder: Arc::new(NullEmbedder),
        embed_model_name: "none".into(),
    });
    let _handles = workers::retention::spawn(worker_ctx);

    let job_id = queue.enqueue(JobType::Retention, None, serde_json::json!({}), 3).await.unwrap();
    let job = wait_for_completion(&queue, &job_id).await;
    assert_eq!(job.status, JobStatus::Completed);

    assert!(matches!(store.get(&created.id).await, Err(signet::error::StoreError::NotFound { .. })));

    let entity_gone = entity_row_exists(&accessor, &entity_id).await;
    assert!(!entity_gone, "entity should have been deleted once its only mention was purged");

    let history = store.history(&created.id).await.unwrap();
    assert!(history.is_empty(), "history older than the retention window should be purged");

    let total_after = count_memories(&accessor).await;
    assert_eq!(total_before - total_after, 1, "exactly one memory row should be hard-deleted");
}

async fn count_memories(accessor: &Arc<signet::db::Accessor>) -> i64 {
    accessor
        .with_read(|conn| async move {
            let mut rows = conn.query("SELECT COUNT(*) FROM memories", ()).await?;
            let row = rows.next().await?.unwrap();
            row.get::<i64>(0).map_err(signet::error::AccessorError::from)
        })
        .await
        .unwrap()
}

async fn entity_row_exists(accessor: &Arc<signet::db::Accessor>, entity_id: &str) -> bool {
    let entity_id = entity_id.to_string();
    accessor
        .with_read(move |conn| async move {
            let mut rows = conn.query("SELECT 1 FROM entities WHERE id = ?1", params![entity_id]).await?;
            Ok(rows.next().await?.is_some())
        })
        .await
        .unwrap()
}

