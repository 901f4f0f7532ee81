//! Decide worker: after extraction, asks the Generator whether a freshly
//! written fact duplicates, updates, or should merge with an existing
//! memory, and applies the resulting modify/forget (spec §4.9 "Decide").

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{CollaboratorError, StoreError};
use crate::jobs::JobType;
use crate::memory::history::{ActorType, ChangeContext};
use crate::memory::model::ModifyPatch;
use crate::recall::RecallFilter;
use crate::workers::{run_poll_loop, WorkerContext, WorkerFailure};

pub fn spawn(ctx: Arc<WorkerContext>) -> tokio::task::JoinHandle<()> {
    run_poll_loop("decide", &[JobType::Decide], ctx, |ctx, job| async move { process_one(ctx, job).await })
}

#[derive(Debug, Deserialize)]
struct Decision {
    action: String,
    #[serde(default, rename = "targetId")]
    target_id: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

async fn process_one(ctx: Arc<WorkerContext>, job: crate::jobs::Job) -> Result<serde_json::Value, WorkerFailure> {
    let Some(memory_id) = job.memory_id.clone() else {
        return Err(WorkerFailure::terminal("invalid_job", "decide job carries no memory_id"));
    };

    let memory = match ctx.store.get(&memory_id).await {
        Ok(m) => m,
        Err(StoreError::NotFound { .. }) => {
            return Err(WorkerFailure::terminal("not_found", "memory no longer exists"));
        }
        Err(e) => return Err(WorkerFailure::new("store_error", e.to_string())),
    };
    if memory.is_deleted {
        return Err(WorkerFailure::terminal("deleted", "memory was deleted before decision ran"));
    }

    let cfg = ctx.config.current().await;
    if !cfg.semantic_contradiction_enabled {
        return Ok(serde_json::json!({ "action": "kept", "reason": "contradiction_pass_disabled" }));
    }

    let filter = RecallFilter {
        kind: Some(memory.kind.clone()),
        who: memory.who.clone(),
        limit: Some(5),
        ..Default::default()
    };
    let candidates = match ctx.recall.recall(&memory.content, filter, &cfg).await {
        Ok(hits) => hits.into_iter().filter(|h| h.id != memory.id).collect::<Vec<_>>(),
        Err(e) => return Err(WorkerFailure::new("recall_error", e.to_string())),
    };
    if candidates.is_empty() {
        return Ok(serde_json::json!({ "action": "kept", "reason": "no_similar_memory" }));
    }

    let existing_summary: Vec<String> =
        candidates.iter().take(5).map(|c| format!("- [{}] {}", c.id, c.content)).collect();
    let prompt = format!(
        "A new memory was just recorded:\n\"{}\"\n\nExisting related memories:\n{}\n\n\
         Decide whether the new memory should be kept as-is, should replace one of the existing \
         memories (action \"update\", with \"targetId\"), or is a pure duplicate that should be \
         dropped (action \"skip\"). Respond with JSON: {{\"action\", \"targetId\", \"reason\"}}.",
        memory.content,
        existing_summary.join("\n"),
    );

    let timeout = Duration::from_millis(cfg.extraction_timeout_ms);
    let raw = match tokio::time::timeout(timeout, ctx.generator.complete(&prompt)).await {
        Ok(Ok(text)) => text,
        Ok(Err(CollaboratorError::NotConfigured)) => {
            return Ok(serde_json::json!({ "action": "kept", "reason": "no_generator" }));
        }
        Ok(Err(e)) => return Err(WorkerFailure::new("generator_error", e.to_string())),
        Err(_) => return Err(WorkerFailure::new("timeout", "decision prompt timed out")),
    };

    let decision: Decision = match serde_json::from_str(&raw) {
        Ok(d) => d,
        Err(_) => return Ok(serde_json::json!({ "action": "kept", "reason": "unparseable_decision" })),
    };

    let worker_ctx = ChangeContext {
        changed_by: Some("decide-worker".to_string()),
        actor_type: Some(ActorType::Worker),
        ..Default::default()
    };

    match decision.action.as_str() {
        "skip" => {
            if let Err(e) = ctx.store.forget(&memory.id, decision.reason.clone(), true, None, worker_ctx).await {
                tracing::warn!(memory_id = %memory.id, error = %e, "decide worker failed to drop duplicate");
            }
        }
        "update" => {
            if let Some(target_id) = &decision.target_id {
                let patch = ModifyPatch { content: Some(memory.content.clone()), ..Default::default() };
                if let Err(e) = ctx.store.modify(target_id, patch, decision.reason.clone(), None, worker_ctx.clone()).await {
                    tracing::warn!(memory_id = %target_id, error = %e, "decide worker failed to apply update");
                } else if let Err(e) = ctx.store.forget(&memory.id, Some("merged into existing memory".into()), true, None, worker_ctx).await {
                    tracing::warn!(memory_id = %memory.id, error = %e, "decide worker failed to drop merged memory");
                }
            }
        }
        _ => {}
    }

    Ok(serde_json::json!({ "action": decision.action, "targetId": decision.target_id }))
}
