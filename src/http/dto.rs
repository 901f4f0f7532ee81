//! Request/response shapes for the HTTP surface that don't already live on
//! a domain type (spec §6). Domain types (`Memory`, `RememberOptions`,
//! `RecallFilter`, `RecallHit`, ...) are reused directly where the wire
//! shape already matches them.

use serde::{Deserialize, Serialize};

use crate::memory::model::BatchItemResult;
use crate::recall::RecallHit;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RememberMode {
    Auto,
    Sync,
    Async,
}

impl Default for RememberMode {
    fn default() -> Self {
        RememberMode::Auto
    }
}

#[derive(Debug, Deserialize)]
pub struct RememberRequest {
    pub content: String,
    #[serde(flatten)]
    pub options: crate::memory::model::RememberOptions,
    #[serde(default)]
    pub mode: RememberMode,
}

#[derive(Debug, Deserialize)]
pub struct RecallRequest {
    #[serde(default)]
    pub query: String,
    #[serde(flatten)]
    pub filter: crate::recall::RecallFilter,
}

#[derive(Debug, Serialize)]
pub struct RecallStats {
    pub total: usize,
    #[serde(rename = "searchTimeMs")]
    pub search_time_ms: u128,
}

#[derive(Debug, Serialize)]
pub struct RecallResponse {
    pub results: Vec<RecallHit>,
    pub stats: RecallStats,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub who: Option<String>,
    pub project: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ModifyRequest {
    #[serde(flatten)]
    pub patch: crate::memory::model::ModifyPatch,
    pub reason: Option<String>,
    #[serde(rename = "if_version")]
    pub if_version: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ModifyResponse {
    pub id: String,
    pub status: &'static str,
    #[serde(rename = "currentVersion")]
    pub current_version: i64,
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub reason: Option<String>,
    #[serde(default)]
    pub force: bool,
    pub if_version: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub id: String,
    pub status: &'static str,
    #[serde(rename = "currentVersion")]
    pub current_version: i64,
}

#[derive(Debug, Deserialize)]
pub struct RecoverRequest {
    pub reason: Option<String>,
    #[serde(rename = "if_version")]
    pub if_version: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchMode {
    Preview,
    Execute,
}

#[derive(Debug, Deserialize)]
pub struct ForgetBatchRequest {
    pub mode: BatchMode,
    pub query: Option<String>,
    pub ids: Option<Vec<String>>,
    pub who: Option<String>,
    pub project: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub reason: Option<String>,
    #[serde(default)]
    pub force: bool,
    #[serde(rename = "confirm_token")]
    pub confirm_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ForgetPreviewResponse {
    pub ids: Vec<String>,
    #[serde(rename = "confirmToken")]
    pub confirm_token: String,
}

#[derive(Debug, Serialize)]
pub struct BatchResultResponse {
    pub results: Vec<BatchItemResult>,
}

#[derive(Debug, Deserialize)]
pub struct ModifyBatchRequest {
    pub ids: Vec<String>,
    #[serde(flatten)]
    pub patch: crate::memory::model::ModifyPatch,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub pid: u32,
    #[serde(rename = "uptimeSecs")]
    pub uptime_secs: i64,
    pub port: u16,
    #[serde(rename = "agentsDir")]
    pub agents_dir: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub config: crate::config::PipelineConfig,
    #[serde(rename = "embeddingDimensions")]
    pub embedding_dimensions: usize,
    #[serde(rename = "signingConfigured")]
    pub signing_configured: bool,
    #[serde(rename = "signerDid")]
    pub signer_did: Option<String>,
    #[serde(rename = "vectorAvailable")]
    pub vector_available: bool,
}

/// Common envelope every hook request carries (spec §4.10, §6).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HookRequest {
    pub harness: Option<String>,
    #[serde(rename = "sessionKey")]
    pub session_key: Option<String>,
    #[serde(rename = "runtimePath")]
    pub runtime_path: Option<String>,
    pub project: Option<String>,
    /// The prompt text (user-prompt-submit) or a recent-context summary
    /// (session-start, pre-compaction) used to build the injection string.
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct HookResponse {
    pub inject: String,
}

#[derive(Debug, Deserialize)]
pub struct HookRememberRequest {
    #[serde(flatten)]
    pub hook: HookRequest,
    pub content: String,
    #[serde(flatten)]
    pub options: crate::memory::model::RememberOptions,
}

#[derive(Debug, Deserialize)]
pub struct HookRecallRequest {
    #[serde(flatten)]
    pub hook: HookRequest,
    #[serde(flatten)]
    pub filter: crate::recall::RecallFilter,
}
