//! Document worker: ingests a file by hashing it, chunking it hierarchically,
//! and writing one memory per chunk with provenance columns — embed jobs
//! follow automatically since `MemoryStore::remember` enqueues them itself
//! (spec §4.9 "Document").

use std::sync::Arc;

use libsql::params;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AccessorError;
use crate::index::chunk;
use crate::jobs::JobType;
use crate::memory::history::{ActorType, ChangeContext};
use crate::memory::model::RememberOptions;
use crate::workers::{run_poll_loop, WorkerContext, WorkerFailure};

pub fn spawn(ctx: Arc<WorkerContext>) -> tokio::task::JoinHandle<()> {
    run_poll_loop("document", &[JobType::Document], ctx, |ctx, job| async move { process_one(ctx, job).await })
}

#[derive(Debug, Deserialize)]
struct DocumentPayload {
    #[serde(rename = "sourcePath")]
    source_path: String,
    #[serde(default)]
    who: Option<String>,
    #[serde(default)]
    project: Option<String>,
}

fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

async fn process_one(ctx: Arc<WorkerContext>, job: crate::jobs::Job) -> Result<serde_json::Value, WorkerFailure> {
    let payload: DocumentPayload = match serde_json::from_value(job.payload.clone()) {
        Ok(p) => p,
        Err(e) => return Err(WorkerFailure::terminal("invalid_job", format!("malformed document payload: {e}"))),
    };

    let bytes = match tokio::fs::read(&payload.source_path).await {
        Ok(b) => b,
        Err(e) => return Err(WorkerFailure::new("io_error", format!("failed to read {}: {e}", payload.source_path))),
    };
    let content = String::from_utf8_lossy(&bytes).into_owned();
    let file_hash = sha256_hex(&bytes);

    let (document_id, unchanged) = find_or_create_document(&ctx, &payload.source_path, &file_hash).await?;
    if unchanged {
        return Ok(serde_json::json!({ "documentId": document_id, "chunksWritten": 0, "skipped": "unchanged" }));
    }

    let cfg = ctx.config.current().await;
    if cfg.shadow_mode {
        return Ok(serde_json::json!({ "documentId": document_id, "chunksWritten": 0, "shadowMode": true }));
    }

    let chunks = chunk::chunk_document(&content);
    let mut written = 0usize;
    for piece in &chunks {
        let opts = RememberOptions {
            kind: Some("fact".to_string()),
            who: payload.who.clone(),
            project: payload.project.clone(),
            source_type: Some("document".to_string()),
            source_path: Some(payload.source_path.clone()),
            source_section: piece.header_path.clone(),
            source_id: Some(document_id.clone()),
            ..Default::default()
        };
        let change_ctx = ChangeContext {
            changed_by: Some("document-worker".to_string()),
            actor_type: Some(ActorType::Worker),
            ..Default::default()
        };
        match ctx.store.remember(&piece.text, opts, change_ctx).await {
            Ok(outcome) => {
                link_chunk(&ctx, &document_id, &outcome.id, piece.index).await;
                written += 1;
            }
            Err(e) => tracing::warn!(document_id = %document_id, error = %e, "failed to write document chunk"),
        }
    }

    mark_ingested(&ctx, &document_id).await;

    Ok(serde_json::json!({ "documentId": document_id, "chunksWritten": written }))
}

async fn find_or_create_document(
    ctx: &Arc<WorkerContext>,
    source_path: &str,
    file_hash: &str,
) -> Result<(String, bool), WorkerFailure> {
    let source_path = source_path.to_string();
    let file_hash = file_hash.to_string();
    let now = chrono::Utc::now().to_rfc3339();
    ctx.accessor
        .with_write_tx(move |conn| {
            Box::pin(async move {
                let mut rows = conn
                    .query("SELECT id, file_hash, ingestion_status FROM documents WHERE source_path = ?1", params![source_path.clone()])
                    .await?;
                if let Some(row) = rows.next().await? {
                    let id: String = row.get(0)?;
                    let existing_hash: String = row.get(1)?;
                    let status: String = row.get(2)?;
                    let unchanged = existing_hash == file_hash && status == "complete";
                    if !unchanged {
                        conn.execute(
                            "UPDATE documents SET file_hash = ?1, ingestion_status = 'pending', updated_at = ?2 WHERE id = ?3",
                            params![file_hash.clone(), now.clone(), id.clone()],
                        )
                        .await?;
                    }
                    return Ok::<_, AccessorError>((id, unchanged));
                }

                let id = Uuid::new_v4().to_string();
                conn.execute(
                    "INSERT INTO documents (id, source_path, file_hash, ingestion_status, created_at, updated_at)
                     VALUES (?1, ?2, ?3, 'pending', ?4, ?4)",
                    params![id.clone(), source_path.clone(), file_hash.clone(), now.clone()],
                )
                .await?;
                Ok((id, false))
            })
        })
        .await
        .map_err(|e| WorkerFailure::new("database_error", e.to_string()))
}

async fn link_chunk(ctx: &Arc<WorkerContext>, document_id: &str, memory_id: &str, chunk_index: usize) {
    let document_id = document_id.to_string();
    let memory_id = memory_id.to_string();
    let (document_id_log, memory_id_log) = (document_id.clone(), memory_id.clone());
    let result = ctx
        .accessor
        .with_write_tx(move |conn| {
            Box::pin(async move {
                conn.execute(
                    "INSERT OR IGNORE INTO document_memories (document_id, memory_id, chunk_index) VALUES (?1, ?2, ?3)",
                    params![document_id, memory_id, chunk_index as i64],
                )
                .await
                .map_err(AccessorError::from)
            })
        })
        .await;
    if let Err(e) = result {
        tracing::warn!(document_id = %document_id_log, memory_id = %memory_id_log, error = %e, "failed to link document chunk");
    }
}

async fn mark_ingested(ctx: &Arc<WorkerContext>, document_id: &str) {
    let document_id = document_id.to_string();
    let document_id_log = document_id.clone();
    let now = chrono::Utc::now().to_rfc3339();
    let result = ctx
        .accessor
        .with_write_tx(move |conn| {
            Box::pin(async move {
                conn.execute(
                    "UPDATE documents SET ingestion_status = 'complete', updated_at = ?1 WHERE id = ?2",
                    params![now, document_id],
                )
                .await
                .map_err(AccessorError::from)
            })
        })
        .await;
    if let Err(e) = result {
        tracing::warn!(document_id = %document_id_log, error = %e, "failed to mark document ingested");
    }
}
