//! Loopback-only HTTP surface (spec §6): memory CRUD, recall, the batch
//! and job-status endpoints, the hook surface the agent harness calls into,
//! and the live log stream.

pub mod dto;
mod routes_hooks;
mod routes_memory;
mod routes_misc;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use chrono::{DateTime, Utc};
use tower_http::trace::TraceLayer;

use crate::config::ConfigHandle;
use crate::jobs::Queue;
use crate::memory::history::ActorType;
use crate::memory::store::MemoryStore;
use crate::recall::RecallEngine;
use crate::session::SessionRegistry;
use crate::signing::Signer;
use crate::telemetry::LogBroadcast;

/// Handles shared by every HTTP handler. Cheap to clone (all fields are
/// `Arc` or `Copy`), but handlers take it behind `State(Arc<AppState>)` so
/// the router itself stays a single allocation.
pub struct AppState {
    pub accessor: Arc<crate::db::Accessor>,
    pub store: Arc<MemoryStore>,
    pub recall: Arc<RecallEngine>,
    pub queue: Arc<Queue>,
    pub config: Arc<ConfigHandle>,
    pub sessions: Arc<SessionRegistry>,
    pub logs: LogBroadcast,
    pub signer: Option<Arc<dyn Signer>>,
    pub started_at: DateTime<Utc>,
    pub pid: u32,
    pub port: u16,
    pub agents_dir: PathBuf,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes_misc::health))
        .route("/api/status", get(routes_misc::status))
        .route("/api/logs/stream", get(routes_misc::logs_stream))
        .route("/api/memory/remember", post(routes_memory::remember))
        .route("/api/memory/recall", post(routes_memory::recall))
        .route("/api/memory/forget", post(routes_memory::forget_batch))
        .route("/api/memory/modify", post(routes_memory::modify_batch))
        .route("/api/memory/jobs/{id}", get(routes_memory::job_status))
        .route(
            "/api/memory/{id}",
            get(routes_memory::get_memory).patch(routes_memory::modify).delete(routes_memory::forget),
        )
        .route("/api/memory/{id}/recover", post(routes_memory::recover))
        .route("/api/memory/{id}/history", get(routes_memory::history))
        .route("/api/memories", get(routes_memory::list))
        .route("/api/hooks/session-start", post(routes_hooks::session_start))
        .route("/api/hooks/user-prompt-submit", post(routes_hooks::user_prompt_submit))
        .route("/api/hooks/session-end", post(routes_hooks::session_end))
        .route("/api/hooks/pre-compaction", post(routes_hooks::pre_compaction))
        .route("/api/hooks/compaction-complete", post(routes_hooks::compaction_complete))
        .route("/api/hooks/remember", post(routes_hooks::remember))
        .route("/api/hooks/recall", post(routes_hooks::recall))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build a [`ChangeContext`](crate::memory::history::ChangeContext) from the
/// request headers (spec §6 "History actor classification"): `x-signet-actor`
/// and `x-signet-actor-type` attribute a mutation to whoever made the call.
pub(crate) fn change_context_from_headers(
    headers: &axum::http::HeaderMap,
    session_id: Option<String>,
) -> crate::memory::history::ChangeContext {
    let changed_by = header_str(headers, "x-signet-actor").map(str::to_string);
    let actor_type = header_str(headers, "x-signet-actor-type").and_then(parse_actor_type);
    crate::memory::history::ChangeContext {
        changed_by,
        actor_type,
        session_id,
        request_id: Some(uuid::Uuid::new_v4().to_string()),
    }
}

fn header_str<'a>(headers: &'a axum::http::HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn parse_actor_type(s: &str) -> Option<ActorType> {
    match s {
        "user" => Some(ActorType::User),
        "harness" => Some(ActorType::Harness),
        "worker" => Some(ActorType::Worker),
        "system" => Some(ActorType::System),
        _ => None,
    }
}
