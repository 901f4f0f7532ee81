//! Memory CRUD, recall, and batch operations (spec §6).

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use sha2::{Digest, Sha256};

use super::dto::{
    BatchResultResponse, DeleteQuery, DeleteResponse, ForgetBatchRequest, ForgetPreviewResponse, HistoryQuery,
    ListQuery, ModifyBatchRequest, ModifyRequest, ModifyResponse, RecallRequest, RecallResponse, RecallStats,
    RecoverRequest, RememberRequest,
};
use super::{change_context_from_headers, AppState};
use crate::error::AppError;
use crate::memory::model::RememberOutcome;
use crate::memory::store::ListFilter;

/// `mode` is accepted for forward compatibility with the harness's
/// async-vs-sync embedding preference, but embedding always happens on the
/// worker queue `remember` already enqueues against — there's no separate
/// inline path to honor yet.
pub async fn remember(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RememberRequest>,
) -> Result<Json<RememberOutcome>, AppError> {
    let ctx = change_context_from_headers(&headers, None);
    let outcome = state.store.remember(&req.content, req.options, ctx).await?;
    Ok(Json(outcome))
}

pub async fn recall(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RecallRequest>,
) -> Result<Json<RecallResponse>, AppError> {
    let started = Instant::now();
    let cfg = state.config.current().await;
    let results = state.recall.recall(&req.query, req.filter, &cfg).await?;
    let stats = RecallStats { total: results.len(), search_time_ms: started.elapsed().as_millis() };
    Ok(Json(RecallResponse { results, stats }))
}

pub async fn get_memory(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<crate::memory::model::Memory>, AppError> {
    let memory = state.store.get(&id).await?;
    state.store.touch_access(&id).await;
    Ok(Json(memory))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<crate::memory::model::Memory>>, AppError> {
    let filter = ListFilter {
        who: q.who,
        project: q.project,
        kind: q.kind,
        pinned: None,
        include_deleted: false,
        limit: q.limit.unwrap_or(50),
        offset: q.offset.unwrap_or(0),
    };
    let memories = state.store.list(filter).await?;
    Ok(Json(memories))
}

pub async fn modify(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ModifyRequest>,
) -> Result<Json<ModifyResponse>, AppError> {
    let ctx = change_context_from_headers(&headers, None);
    let new_version = state.store.modify(&id, req.patch, req.reason, req.if_version, ctx).await?;
    Ok(Json(ModifyResponse { id, status: "updated", current_version: new_version }))
}

pub async fn forget(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Query(q): Query<DeleteQuery>,
) -> Result<Json<DeleteResponse>, AppError> {
    let ctx = change_context_from_headers(&headers, None);
    let new_version = state.store.forget(&id, q.reason, q.force, q.if_version, ctx).await?;
    Ok(Json(DeleteResponse { id, status: "deleted", current_version: new_version }))
}

pub async fn recover(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<RecoverRequest>,
) -> Result<Json<ModifyResponse>, AppError> {
    let ctx = change_context_from_headers(&headers, None);
    let new_version = state.store.recover(&id, req.reason, req.if_version, ctx).await?;
    Ok(Json(ModifyResponse { id, status: "recovered", current_version: new_version }))
}

pub async fn history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<Vec<crate::memory::history::HistoryEvent>>, AppError> {
    // Confirm the memory exists so a typo'd id reports `not_found` rather
    // than a silently empty history list.
    state.store.get(&id).await?;
    let mut events = state.store.history(&id).await?;
    if let Some(limit) = q.limit {
        events.truncate(limit);
    }
    Ok(Json(events))
}

pub async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobStatusResponse>, AppError> {
    let job = state.queue.get(&id).await?;
    Ok(Json(JobStatusResponse {
        id: job.id,
        job_type: job.job_type,
        status: job.status,
        attempts: job.attempts,
        max_attempts: job.max_attempts,
        result: job.result,
    }))
}

#[derive(Debug, serde::Serialize)]
pub struct JobStatusResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: crate::jobs::JobType,
    pub status: crate::jobs::JobStatus,
    pub attempts: i64,
    #[serde(rename = "maxAttempts")]
    pub max_attempts: i64,
    pub result: Option<serde_json::Value>,
}

/// Batch forget: preview resolves the target id set and returns a token the
/// execute call must echo back, so a caller can't accidentally delete a
/// result set it never actually saw (spec §6, §7 "confirm-token mismatch").
pub async fn forget_batch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ForgetBatchRequest>,
) -> Result<axum::response::Response, AppError> {
    use axum::response::IntoResponse;

    let ids = resolve_target_ids(&state, &req).await?;
    let token = confirm_token(&ids, req.reason.as_deref());

    match req.mode {
        super::dto::BatchMode::Preview => Ok(Json(ForgetPreviewResponse { ids, confirm_token: token }).into_response()),
        super::dto::BatchMode::Execute => {
            let Some(provided) = &req.confirm_token else {
                return Err(AppError::new(crate::error::ErrorCode::VersionConflict, "execute requires confirm_token from a prior preview"));
            };
            if *provided != token {
                return Err(AppError::new(crate::error::ErrorCode::VersionConflict, "confirm_token does not match the current target set"));
            }
            let ctx = change_context_from_headers(&headers, None);
            let results = state.store.batch_forget(ids, req.reason, req.force, ctx).await;
            Ok(Json(BatchResultResponse { results }).into_response())
        }
    }
}

pub async fn modify_batch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ModifyBatchRequest>,
) -> Result<Json<BatchResultResponse>, AppError> {
    let ctx = change_context_from_headers(&headers, None);
    let results = state.store.batch_modify(req.ids, req.patch, req.reason, ctx).await;
    Ok(Json(BatchResultResponse { results }))
}

async fn resolve_target_ids(state: &AppState, req: &ForgetBatchRequest) -> Result<Vec<String>, AppError> {
    if let Some(ids) = &req.ids {
        return Ok(ids.clone());
    }
    let filter = ListFilter {
        who: req.who.clone(),
        project: req.project.clone(),
        kind: req.kind.clone(),
        pinned: None,
        include_deleted: false,
        limit: state.config.current().await.batch_limit,
        offset: 0,
    };
    if let Some(query) = &req.query {
        if !query.trim().is_empty() {
            let cfg = state.config.current().await;
            let recall_filter = crate::recall::RecallFilter {
                who: filter.who.clone(),
                kind: filter.kind.clone(),
                limit: Some(filter.limit),
                ..Default::default()
            };
            let hits = state.recall.recall(query, recall_filter, &cfg).await?;
            return Ok(hits.into_iter().map(|h| h.id).collect());
        }
    }
    let memories = state.store.list(filter).await?;
    Ok(memories.into_iter().map(|m| m.id).collect())
}

fn confirm_token(ids: &[String], reason: Option<&str>) -> String {
    let mut sorted = ids.to_vec();
    sorted.sort();
    let mut hasher = Sha256::new();
    hasher.update(sorted.join("|").as_bytes());
    hasher.update(reason.unwrap_or("").as_bytes());
    hex::encode(hasher.finalize())
}
