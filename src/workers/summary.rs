//! Summary worker: consumes a session transcript captured at session end,
//! writes a `summary`-typed memory, and optionally appends to an identity
//! markdown file (spec §4.9 "Summary").

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::CollaboratorError;
use crate::jobs::JobType;
use crate::memory::history::{ActorType, ChangeContext};
use crate::memory::model::RememberOptions;
use crate::workers::{run_poll_loop, WorkerContext, WorkerFailure};

/// Per-operation default (spec §5 "Timeouts").
const SUMMARY_TIMEOUT: Duration = Duration::from_secs(60);

pub fn spawn(ctx: Arc<WorkerContext>) -> tokio::task::JoinHandle<()> {
    run_poll_loop("summary", &[JobType::Summary], ctx, |ctx, job| async move { process_one(ctx, job).await })
}

#[derive(Debug, Deserialize)]
struct SummaryPayload {
    transcript: String,
    #[serde(default)]
    who: Option<String>,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    session_key: Option<String>,
    #[serde(default)]
    identity_path: Option<String>,
}

const SUMMARY_SYSTEM_PROMPT: &str = "Summarise this session transcript into a concise paragraph covering \
decisions made, facts learned, and open follow-ups. Plain text, no markdown headers.";

async fn process_one(ctx: Arc<WorkerContext>, job: crate::jobs::Job) -> Result<serde_json::Value, WorkerFailure> {
    let payload: SummaryPayload = match serde_json::from_value(job.payload.clone()) {
        Ok(p) => p,
        Err(e) => return Err(WorkerFailure::terminal("invalid_job", format!("malformed summary payload: {e}"))),
    };
    if payload.transcript.trim().is_empty() {
        return Err(WorkerFailure::terminal("invalid_job", "summary payload carries an empty transcript"));
    }

    let prompt = format!("{SUMMARY_SYSTEM_PROMPT}\n\n{}", payload.transcript);
    let summary_text = match tokio::time::timeout(SUMMARY_TIMEOUT, ctx.generator.complete(&prompt)).await {
        Ok(Ok(text)) => text,
        Ok(Err(CollaboratorError::NotConfigured)) => {
            return Err(WorkerFailure::terminal("no_generator", "no Generator collaborator configured"));
        }
        Ok(Err(e)) => return Err(WorkerFailure::new("generator_error", e.to_string())),
        Err(_) => return Err(WorkerFailure::new("timeout", "summary generation timed out")),
    };

    let cfg = ctx.config.current().await;
    if cfg.shadow_mode {
        return Ok(serde_json::json!({ "memoryId": null, "shadowMode": true }));
    }

    let opts = RememberOptions {
        kind: Some("summary".to_string()),
        who: payload.who.clone(),
        project: payload.project.clone(),
        source_type: Some("session_summary".to_string()),
        source_id: payload.session_key.clone(),
        ..Default::default()
    };
    let change_ctx = ChangeContext {
        changed_by: Some("summary-worker".to_string()),
        actor_type: Some(ActorType::Worker),
        session_id: payload.session_key.clone(),
        ..Default::default()
    };
    let outcome = ctx
        .store
        .remember(&summary_text, opts, change_ctx)
        .await
        .map_err(|e| WorkerFailure::new("store_error", e.to_string()))?;

    if let Some(path) = &payload.identity_path {
        if let Err(e) = append_identity_file(path, &summary_text).await {
            tracing::warn!(path = %path, error = %e, "failed to append session summary to identity file");
        }
    }

    Ok(serde_json::json!({ "memoryId": outcome.id }))
}

async fn append_identity_file(path: &str, summary_text: &str) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;
    let entry = format!("\n## {}\n\n{}\n", chrono::Utc::now().to_rfc3339(), summary_text);
    let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(entry.as_bytes()).await
}
