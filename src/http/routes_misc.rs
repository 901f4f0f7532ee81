//! Health, status, and the live log stream (spec §6).

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use futures::stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use super::dto::{HealthResponse, StatusResponse};
use super::AppState;
use crate::index::vector;

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let uptime_secs = (Utc::now() - state.started_at).num_seconds().max(0);
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        pid: state.pid,
        uptime_secs,
        port: state.port,
        agents_dir: state.agents_dir.display().to_string(),
    })
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let config = state.config.current().await;
    let vector_available = state.accessor.with_read(|conn| async move { vector::vector_available(&conn).await }).await.unwrap_or(false);
    let signer_did = match &state.signer {
        Some(signer) => signer.did().await,
        None => None,
    };

    Json(StatusResponse {
        config,
        embedding_dimensions: state.recall.embedding_dimensions(),
        signing_configured: state.signer.is_some(),
        signer_did,
        vector_available,
    })
}

/// Live-tail the structured log broadcast as newline-delimited JSON SSE
/// events (spec §6). A dropped/slow subscriber just misses the lines the
/// broadcast channel evicted; the stream itself never errors out.
pub async fn logs_stream(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let rx = state.logs.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|item| async move {
        match item {
            Ok(line) => Some(Ok::<Event, Infallible>(Event::default().data(line))),
            Err(_lagged) => None,
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
