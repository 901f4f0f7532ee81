//! Extract worker: runs the Generator over a memory's content to pull out
//! structured facts and entity mentions, writing derived memories and graph
//! links (spec §4.9 "Extract").

use std::sync::Arc;
use std::time::Duration;

use libsql::params;

use crate::collaborators::ExtractedFact;
use crate::error::{CollaboratorError, StoreError};
use crate::graph;
use crate::jobs::JobType;
use crate::memory::history::{ActorType, ChangeContext};
use crate::memory::model::RememberOptions;
use crate::workers::{run_poll_loop, WorkerContext, WorkerFailure};

pub fn spawn(ctx: Arc<WorkerContext>) -> tokio::task::JoinHandle<()> {
    run_poll_loop("extract", &[JobType::Extract], ctx, |ctx, job| async move { process_one(ctx, job).await })
}

async fn process_one(ctx: Arc<WorkerContext>, job: crate::jobs::Job) -> Result<serde_json::Value, WorkerFailure> {
    let Some(memory_id) = job.memory_id.clone() else {
        return Err(WorkerFailure::terminal("invalid_job", "extract job carries no memory_id"));
    };

    let memory = match ctx.store.get(&memory_id).await {
        Ok(m) => m,
        Err(StoreError::NotFound { .. }) => {
            return Err(WorkerFailure::terminal("not_found", "memory no longer exists"));
        }
        Err(e) => return Err(WorkerFailure::new("store_error", e.to_string())),
    };
    if memory.is_deleted {
        return Err(WorkerFailure::terminal("deleted", "memory was deleted before extraction ran"));
    }

    let cfg = ctx.config.current().await;
    let timeout = Duration::from_millis(cfg.extraction_timeout_ms);
    let facts: Vec<ExtractedFact> = match tokio::time::timeout(timeout, ctx.generator.extract(&memory.content)).await {
        Ok(Ok(facts)) => facts,
        Ok(Err(CollaboratorError::NotConfigured)) => {
            return Err(WorkerFailure::terminal("no_generator", "no Generator collaborator configured"));
        }
        Ok(Err(e)) => return Err(WorkerFailure::new("generator_error", e.to_string())),
        Err(_) => return Err(WorkerFailure::new("timeout", "generator extraction timed out")),
    };

    let mut written = Vec::new();
    if !cfg.shadow_mode {
        for fact in &facts {
            if fact.confidence < cfg.min_fact_confidence_for_write {
                continue;
            }
            let opts = RememberOptions {
                kind: Some(fact.kind.clone()),
                confidence: Some(fact.confidence),
                who: memory.who.clone(),
                project: memory.project.clone(),
                source_type: Some("extraction".to_string()),
                source_id: Some(memory_id.clone()),
                ..Default::default()
            };
            let ctx_change = ChangeContext {
                changed_by: Some("extract-worker".to_string()),
                actor_type: Some(ActorType::Worker),
                ..Default::default()
            };
            match ctx.store.remember(&fact.content, opts, ctx_change).await {
                Ok(outcome) if !outcome.deduped => {
                    if cfg.graph_enabled {
                        link_entities(&ctx, &outcome.id, fact).await;
                    }
                    if cfg.semantic_contradiction_enabled {
                        let _ = ctx
                            .queue
                            .enqueue(JobType::Decide, Some(outcome.id.clone()), serde_json::json!({}), cfg.worker_max_retries as i64)
                            .await;
                    }
                    written.push(outcome.id);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(memory_id = %memory_id, error = %e, "failed to write extracted fact"),
            }
        }
    }

    mark_extraction_status(&ctx, &memory_id, "done").await;

    Ok(serde_json::json!({ "factsExtracted": facts.len(), "memoriesWritten": written }))
}

async fn link_entities(ctx: &Arc<WorkerContext>, fact_memory_id: &str, fact: &ExtractedFact) {
    if fact.entities.is_empty() {
        return;
    }
    let fact_memory_id = fact_memory_id.to_string();
    let fact_memory_id_log = fact_memory_id.clone();
    let entities = fact.entities.clone();
    let result = ctx
        .accessor
        .with_write_tx(move |conn| {
            Box::pin(async move {
                for entity in &entities {
                    let entity_id = graph::upsert_entity(conn, &entity.name, &entity.entity_type).await?;
                    graph::link_mention(conn, &fact_memory_id, &entity_id, &entity.name, entity.confidence).await?;
                }
                Ok::<(), crate::error::GraphError>(())
            })
        })
        .await;
    if let Err(e) = result {
        tracing::warn!(memory_id = %fact_memory_id_log, error = %e, "failed to link extracted entities");
    }
}

async fn mark_extraction_status(ctx: &Arc<WorkerContext>, memory_id: &str, status: &str) {
    let memory_id = memory_id.to_string();
    let status = status.to_string();
    let result = ctx
        .accessor
        .with_write_tx(move |conn| {
            Box::pin(async move {
                conn.execute(
                    "UPDATE memories SET extraction_status = ?1 WHERE id = ?2",
                    params![status, memory_id],
                )
                .await
                .map_err(crate::error::AccessorError::from)
            })
        })
        .await;
    if let Err(e) = result {
        tracing::warn!(error = %e, "failed to update extraction_status");
    }
}
