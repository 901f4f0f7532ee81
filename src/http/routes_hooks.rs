//! Agent harness hook surface (spec §4.10, §6): session lifecycle, the
//! injection endpoints a harness calls around prompts and compaction, and
//! the harness-facing remember/recall shortcuts.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use super::dto::{HookRecallRequest, HookRememberRequest, HookRequest, HookResponse};
use super::AppState;
use crate::error::AppError;
use crate::memory::history::{ActorType, ChangeContext};
use crate::memory::model::RememberOutcome;
use crate::recall::RecallFilter;
use crate::session::build_injection;

#[derive(Debug, Serialize)]
pub struct HookAck {
    pub status: &'static str,
}

fn hook_context(hook: &HookRequest) -> ChangeContext {
    ChangeContext {
        changed_by: hook.harness.clone(),
        actor_type: Some(ActorType::Harness),
        session_id: hook.session_key.clone(),
        request_id: Some(Uuid::new_v4().to_string()),
    }
}

/// A session with no `sessionKey` (older harnesses, ad-hoc callers) still
/// gets an injection — it just isn't tracked in the registry.
async fn claim_if_present(state: &AppState, hook: &HookRequest) -> Result<(), AppError> {
    if let Some(session_key) = &hook.session_key {
        let runtime_path = hook.runtime_path.as_deref().unwrap_or("default");
        state.sessions.claim(session_key, runtime_path).await?;
    }
    Ok(())
}

async fn inject_for(state: &AppState, hook: &HookRequest) -> Result<String, AppError> {
    let cfg = state.config.current().await;
    let filter = RecallFilter { who: hook.project.clone(), ..Default::default() };
    let inject = build_injection(&state.recall, &cfg, &hook.query, filter).await?;
    Ok(inject)
}

pub async fn session_start(
    State(state): State<Arc<AppState>>,
    Json(hook): Json<HookRequest>,
) -> Result<Json<HookResponse>, AppError> {
    claim_if_present(&state, &hook).await?;
    let inject = inject_for(&state, &hook).await?;
    Ok(Json(HookResponse { inject }))
}

pub async fn user_prompt_submit(
    State(state): State<Arc<AppState>>,
    Json(hook): Json<HookRequest>,
) -> Result<Json<HookResponse>, AppError> {
    if let Some(session_key) = &hook.session_key {
        state.sessions.ensure_claimed(session_key).await;
    }
    let inject = inject_for(&state, &hook).await?;
    Ok(Json(HookResponse { inject }))
}

pub async fn session_end(State(state): State<Arc<AppState>>, Json(hook): Json<HookRequest>) -> Json<HookAck> {
    if let Some(session_key) = &hook.session_key {
        state.sessions.end(session_key).await;
    }
    Json(HookAck { status: "ended" })
}

pub async fn pre_compaction(
    State(state): State<Arc<AppState>>,
    Json(hook): Json<HookRequest>,
) -> Result<Json<HookResponse>, AppError> {
    // Same shape as session-start: the harness is about to lose scrollback,
    // so the injection doubles as a pre-compaction save point on the
    // caller's side. Signet's own state is unaffected.
    let inject = inject_for(&state, &hook).await?;
    Ok(Json(HookResponse { inject }))
}

pub async fn compaction_complete(Json(_hook): Json<HookRequest>) -> Json<HookAck> {
    Json(HookAck { status: "ok" })
}

pub async fn remember(
    State(state): State<Arc<AppState>>,
    Json(req): Json<HookRememberRequest>,
) -> Result<Json<RememberOutcome>, AppError> {
    claim_if_present(&state, &req.hook).await?;
    let ctx = hook_context(&req.hook);
    let outcome = state.store.remember(&req.content, req.options, ctx).await?;
    Ok(Json(outcome))
}

pub async fn recall(
    State(state): State<Arc<AppState>>,
    Json(req): Json<HookRecallRequest>,
) -> Result<Json<HookResponse>, AppError> {
    let cfg = state.config.current().await;
    let inject = build_injection(&state.recall, &cfg, &req.hook.query, req.filter).await?;
    Ok(Json(HookResponse { inject }))
}
