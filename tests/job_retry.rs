//! An embed job whose Embedder fails twice then succeeds rides the retry
//! ladder to completion and leaves the memory embedded.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use libsql::params;
use signet::collaborators::{Embedder, Generator, NullGenerator};
use signet::error::CollaboratorError;
use signet::jobs::{JobStatus, JobType, Queue};
use signet::memory::model::{self, RememberOptions};
use signet::recall::RecallEngine;
use signet::workers::{self, WorkerContext};

/// Fails the first `failures_remaining` calls, then always succeeds with a
/// fixed 8-dimensional vector.
struct FlakyEmbedder {
    failures_remaining: AtomicUsize,
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, CollaboratorError> {
        if self.failures_remaining.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| if n > 0 { Some(n - 1) } else { None }).is_ok() {
            return Err(CollaboratorError::Request("embedder temporarily unavailable".into()));
        }
        Ok(vec![0.1; 8])
    }

    fn dimensions(&self) -> usize {
        8
    }
}

async fn wait_for_completion(queue: &Queue, job_id: &str) -> signet::jobs::Job {
    for _ in 0..400 {
        let job = queue.get(job_id).await.unwrap();
        if matches!(job.status, JobStatus::Completed | JobStatus::Dead) {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("embed job {job_id} never reached a terminal state");
}

#[tokio::test]
async fn embed_job_retries_past_transient_failures_then_completes() {
    let (accessor, dir) = common::accessor().await;
    let cfg = common::config(&dir, "shadow_mode = true\nworker_poll_ms = 20\n");
    let queue = Arc::new(Queue::new(accessor.clone()));
    let store = common::store(accessor.clone(), queue.clone(), cfg.clone());
    let embedder: Arc<dyn Embedder> = Arc::new(FlakyEmbedder { failures_remaining: AtomicUsize::new(2) });
    let recall = Arc::new(RecallEngine::new(accessor.clone(), embedder.clone()));

    let created = store.remember("Our release cadence is every other Tuesday", RememberOptions::default(), common::ctx()).await.unwrap();

    let generator: Arc<dyn Generator> = Arc::new(NullGenerator);
    let worker_ctx = Arc::new(WorkerContext {
        accessor: accessor.clone(),
        queue: queue.clone(),
        store: store.clone(),
        config: cfg.clone(),
        recall,
        generator,
        embedder,
        embed_model_name: "mock-embedder".into(),
    });
    let _handle = workers::embed::spawn(worker_ctx);

    let job_id = queue.enqueue(JobType::Embed, Some(created.id.clone()), serde_json::json!({}), 3).await.unwrap();
    let job = wait_for_completion(&queue, &job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 3, "two failed leases plus the one that finally succeeded");

    let memory = store.get(&created.id).await.unwrap();
    assert_eq!(memory.embedding_model.as_deref(), Some("mock-embedder"));

    let content_hash = model::content_hash(&model::normalize_content("Our release cadence is every other Tuesday"));
    let embedded = embedding_row_exists(&accessor, &content_hash).await;
    assert!(embedded, "a vector row addressed by the content's hash should exist");
}

async fn embedding_row_exists(accessor: &Arc<signet::db::Accessor>, content_hash: &str) -> bool {
    let content_hash = content_hash.to_string();
    accessor
        .with_read(move |conn| async move {
            let mut rows = conn.query("SELECT 1 FROM embeddings WHERE content_hash = ?1", params![content_hash]).await?;
            Ok(rows.next().await?.is_some())
        })
        .await
        .unwrap()
}
