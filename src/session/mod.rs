//! Session state machine and injection-string assembly (spec §4.10).
//!
//! A session moves `absent → claimed(runtime_path) → ended`. The registry
//! lives only in process memory — sessions are a hook-surface convenience,
//! not a durable entity — guarded by a single `RwLock` the same way
//! `ConfigHandle` guards its config snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::config::PipelineConfig;
use crate::error::{RecallError, SessionError};
use crate::recall::{RecallEngine, RecallFilter, RecallHit};

#[derive(Debug, Clone)]
struct SessionEntry {
    runtime_path: String,
    claimed_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

/// Outcome of a claim attempt, distinguishing a fresh claim from an
/// idempotent re-claim by the same runtime path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    AlreadyOwned,
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self { sessions: RwLock::new(HashMap::new()) }
    }

    /// Claim `session_key` for `runtime_path`. A live claim by a different
    /// runtime path is rejected to prevent double-injection; re-claiming
    /// with the same runtime path (retry, reconnect) is a no-op success.
    pub async fn claim(&self, session_key: &str, runtime_path: &str) -> Result<ClaimOutcome, SessionError> {
        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get(session_key) {
            if entry.ended_at.is_none() {
                if entry.runtime_path == runtime_path {
                    return Ok(ClaimOutcome::AlreadyOwned);
                }
                return Err(SessionError::AlreadyClaimed {
                    session_key: session_key.to_string(),
                    existing: entry.runtime_path.clone(),
                });
            }
        }
        sessions.insert(
            session_key.to_string(),
            SessionEntry { runtime_path: runtime_path.to_string(), claimed_at: Utc::now(), ended_at: None },
        );
        Ok(ClaimOutcome::Claimed)
    }

    /// `user-prompt-submit` semantics: use the existing claim if live,
    /// otherwise auto-claim with the `legacy` runtime path.
    pub async fn ensure_claimed(&self, session_key: &str) -> String {
        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get(session_key) {
            if entry.ended_at.is_none() {
                return entry.runtime_path.clone();
            }
        }
        let runtime_path = "legacy".to_string();
        sessions.insert(
            session_key.to_string(),
            SessionEntry { runtime_path: runtime_path.clone(), claimed_at: Utc::now(), ended_at: None },
        );
        runtime_path
    }

    /// Mark a session ended. Idempotent; ending an absent or already-ended
    /// session is a no-op so retried hook calls don't error.
    pub async fn end(&self, session_key: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get_mut(session_key) {
            entry.ended_at = Some(Utc::now());
        }
    }

    pub async fn runtime_path(&self, session_key: &str) -> Option<String> {
        let sessions = self.sessions.read().await;
        sessions.get(session_key).filter(|e| e.ended_at.is_none()).map(|e| e.runtime_path.clone())
    }
}

/// Calls the Recall Engine with `query` (or a recent-context summary the
/// caller has already produced) and formats the top results into a compact
/// injection block (spec §4.10). Returns an empty string when nothing is
/// relevant — the daemon never injects an empty-but-present block.
pub async fn build_injection(
    recall: &Arc<RecallEngine>,
    cfg: &PipelineConfig,
    query: &str,
    filter: RecallFilter,
) -> Result<String, RecallError> {
    let hits = recall.recall(query, filter, cfg).await?;
    Ok(format_injection(&hits, query))
}

fn format_injection(hits: &[RecallHit], query: &str) -> String {
    if hits.is_empty() {
        return String::new();
    }
    let mut out = format!("[signet] {} relevant {} (engine: hybrid-recall", hits.len(), pluralize(hits.len()));
    let trimmed = query.trim();
    if !trimmed.is_empty() {
        out.push_str(&format!(", query: \"{trimmed}\""));
    }
    out.push_str(")\n");
    for hit in hits {
        out.push_str(&format!("- ({:.2}) [{}] {}\n", hit.score, hit.kind, hit.content));
    }
    out
}

fn pluralize(count: usize) -> &'static str {
    if count == 1 { "memory" } else { "memories" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claim_then_reclaim_same_path_is_idempotent() {
        let registry = SessionRegistry::new();
        assert_eq!(registry.claim("s1", "plugin").await.unwrap(), ClaimOutcome::Claimed);
        assert_eq!(registry.claim("s1", "plugin").await.unwrap(), ClaimOutcome::AlreadyOwned);
    }

    #[tokio::test]
    async fn claim_by_different_runtime_path_conflicts() {
        let registry = SessionRegistry::new();
        registry.claim("s1", "plugin").await.unwrap();
        let err = registry.claim("s1", "legacy").await.unwrap_err();
        assert!(matches!(err, SessionError::AlreadyClaimed { .. }));
    }

    #[tokio::test]
    async fn user_prompt_auto_claims_legacy_when_unclaimed() {
        let registry = SessionRegistry::new();
        let runtime_path = registry.ensure_claimed("s1").await;
        assert_eq!(runtime_path, "legacy");
        assert_eq!(registry.runtime_path("s1").await.as_deref(), Some("legacy"));
    }

    #[tokio::test]
    async fn user_prompt_respects_existing_claim() {
        let registry = SessionRegistry::new();
        registry.claim("s1", "plugin").await.unwrap();
        let runtime_path = registry.ensure_claimed("s1").await;
        assert_eq!(runtime_path, "plugin");
    }

    #[tokio::test]
    async fn ending_a_session_allows_reclaim_by_another_path() {
        let registry = SessionRegistry::new();
        registry.claim("s1", "plugin").await.unwrap();
        registry.end("s1").await;
        assert_eq!(registry.claim("s1", "legacy").await.unwrap(), ClaimOutcome::Claimed);
    }

    #[test]
    fn empty_hits_format_to_empty_string() {
        assert_eq!(format_injection(&[], "hello"), "");
    }
}
