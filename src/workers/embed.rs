//! Embed worker: calls the Embedder on a memory's (chunked) normalised
//! content and writes vectors into the embedding store, keyed by content
//! hash (spec §4.9 "Embed").

use std::sync::Arc;
use std::time::Duration;

use libsql::params;

use crate::error::{CollaboratorError, StoreError};
use crate::index::{chunk, vector};
use crate::jobs::JobType;
use crate::memory::model;
use crate::workers::{run_poll_loop, WorkerContext, WorkerFailure};

/// Per-operation default (spec §5 "Timeouts").
const EMBED_TIMEOUT: Duration = Duration::from_secs(10);

pub fn spawn(ctx: Arc<WorkerContext>) -> tokio::task::JoinHandle<()> {
    run_poll_loop("embed", &[JobType::Embed], ctx, |ctx, job| async move { process_one(ctx, job).await })
}

async fn process_one(ctx: Arc<WorkerContext>, job: crate::jobs::Job) -> Result<serde_json::Value, WorkerFailure> {
    let Some(memory_id) = job.memory_id.clone() else {
        return Err(WorkerFailure::terminal("invalid_job", "embed job carries no memory_id"));
    };

    let memory = match ctx.store.get(&memory_id).await {
        Ok(m) => m,
        Err(StoreError::NotFound { .. }) => {
            return Err(WorkerFailure::terminal("not_found", "memory no longer exists"));
        }
        Err(e) => return Err(WorkerFailure::new("store_error", e.to_string())),
    };
    if memory.is_deleted {
        return Err(WorkerFailure::terminal("deleted", "memory was deleted before embedding ran"));
    }

    let chunks = chunk::chunk_document(&memory.content);
    if chunks.is_empty() {
        return Ok(serde_json::json!({ "chunksEmbedded": 0 }));
    }

    let mut embedded = 0usize;
    for piece in &chunks {
        let embedding = match tokio::time::timeout(EMBED_TIMEOUT, ctx.embedder.embed(&piece.text)).await {
            Ok(Ok(v)) => v,
            Ok(Err(CollaboratorError::NotConfigured)) => {
                return Err(WorkerFailure::terminal("no_embedder", "no Embedder collaborator configured"));
            }
            Ok(Err(e)) => return Err(WorkerFailure::new("embedder_error", e.to_string())),
            Err(_) => return Err(WorkerFailure::new("timeout", "embedder call timed out")),
        };

        let content_hash = model::content_hash(&piece.text);
        let memory_id = memory_id.clone();
        let chunk_text = piece.text.clone();
        let result = ctx
            .accessor
            .with_write_tx(move |conn| {
                Box::pin(async move {
                    vector::upsert_embedding(conn, &content_hash, &embedding, "memory", &memory_id, &chunk_text).await
                })
            })
            .await;
        match result {
            Ok(()) => embedded += 1,
            Err(e) => return Err(WorkerFailure::new("database_error", e.to_string())),
        }
    }

    stamp_embedding_model(&ctx, &memory_id).await;

    Ok(serde_json::json!({ "chunksEmbedded": embedded }))
}

async fn stamp_embedding_model(ctx: &Arc<WorkerContext>, memory_id: &str) {
    let memory_id = memory_id.to_string();
    let model_name = ctx.embed_model_name.clone();
    let result = ctx
        .accessor
        .with_write_tx(move |conn| {
            Box::pin(async move {
                conn.execute(
                    "UPDATE memories SET embedding_model = ?1 WHERE id = ?2",
                    params![model_name, memory_id],
                )
                .await
                .map_err(crate::error::AccessorError::from)
            })
        })
        .await;
    if let Err(e) = result {
        tracing::warn!(error = %e, "failed to stamp embedding_model");
    }
}
